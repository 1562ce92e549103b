// the relay. Manifests get buffered and rewritten so every reference comes back through us,
// everything else streams through untouched
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    StatusCode,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        services::fetcher_services::{ByteStream, DynRemoteFetcher, UpstreamResponse},
        utils::{
            encoding_utils::{UPSTREAM_ACCEPT_ENCODING, decode_body},
            identity_utils::{ClientIdentity, random_identity},
            m3u8_utils::{ContentKind, MANIFEST_CONTENT_TYPE, rewrite_manifest},
        },
    },
};

pub type DynRelayService = Arc<dyn RelayServiceTrait + Send + Sync>;

/// playlists are a few KB, anything this big is not one
const MAX_MANIFEST_BYTES: usize = 8 * 1024 * 1024;

/// client headers that matter for partial requests
const FORWARDED_CLIENT_HEADERS: [HeaderName; 2] = [header::RANGE, header::IF_RANGE];

/// upstream headers a player needs to seek inside a segment
const PASSTHROUGH_HEADERS: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::CONTENT_ENCODING,
    header::ETAG,
    header::LAST_MODIFIED,
];

pub enum ProxyBody {
    Manifest(String),
    Stream(ByteStream),
}

pub struct ProxyResponse {
    pub status: StatusCode,
    pub kind: ContentKind,
    pub headers: HeaderMap,
    pub body: ProxyBody,
}

#[async_trait]
pub trait RelayServiceTrait {
    async fn relay(&self, url: &str, client_headers: &HeaderMap) -> AppResult<ProxyResponse>;
}

pub struct RelayService {
    fetcher: DynRemoteFetcher,
    timeout: Duration,
    relay_route: String,
}

impl RelayService {
    pub fn new(fetcher: DynRemoteFetcher, config: &AppConfig) -> Self {
        Self {
            fetcher,
            timeout: config.relay_timeout(),
            relay_route: config.relay_route.clone(),
        }
    }

    /// browser-ish headers with referer/origin pointing at the target's own site
    pub fn upstream_headers(
        target: &Url,
        identity: &ClientIdentity,
        client_headers: &HeaderMap,
    ) -> HeaderMap {
        let origin = target.origin().ascii_serialization();
        let mut headers = HeaderMap::new();

        let static_headers = [
            (header::USER_AGENT, identity.user_agent),
            (header::ACCEPT, "*/*"),
            (header::ACCEPT_LANGUAGE, identity.accept_language),
            (header::ACCEPT_ENCODING, UPSTREAM_ACCEPT_ENCODING),
            (header::CONNECTION, "keep-alive"),
        ];
        for (name, value) in static_headers {
            headers.insert(name, HeaderValue::from_static(value));
        }
        for (name, value) in [
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
        ] {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }

        if let Ok(value) = HeaderValue::from_str(&format!("{}/", origin)) {
            headers.insert(header::REFERER, value);
        }
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(header::ORIGIN, value);
        }

        // a partial playlist cannot be rewritten, manifests are always fetched whole
        if ContentKind::classify(None, target.as_str()) != ContentKind::Manifest {
            for name in FORWARDED_CLIENT_HEADERS {
                if let Some(value) = client_headers.get(&name) {
                    headers.insert(name, value.clone());
                }
            }
        }

        headers
    }

    async fn relay_manifest(
        &self,
        target: &Url,
        content_type: Option<String>,
        response: UpstreamResponse,
    ) -> AppResult<ProxyResponse> {
        let status = response.status;
        // relative references resolve against wherever the redirects ended
        let base = response.final_url.clone().unwrap_or_else(|| target.clone());
        if &base != target {
            debug!("rewriting manifest against redirected url {}", base);
        }
        let content_encoding = response
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.collect(MAX_MANIFEST_BYTES).await?;
        let decoded = decode_body(content_encoding.as_deref(), &bytes).map_err(|e| {
            error!("Failed to decompress manifest: {}", e);
            Error::Upstream(format!("Failed to decompress manifest: {}", e))
        })?;

        let text = String::from_utf8(decoded).map_err(|e| {
            error!("Failed to parse m3u8 as UTF-8: {}", e);
            Error::Upstream("Invalid m3u8 encoding".to_string())
        })?;
        debug!("M3U8 text length: {} chars", text.len());

        let rewritten = rewrite_manifest(&text, &base, &self.relay_route);

        // players are picky about playlist types, only keep upstream's if it says mpegurl
        let content_type = content_type
            .filter(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
            .unwrap_or_else(|| MANIFEST_CONTENT_TYPE.to_string());

        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        Ok(ProxyResponse {
            status,
            kind: ContentKind::Manifest,
            headers,
            body: ProxyBody::Manifest(rewritten),
        })
    }

    fn relay_stream(kind: ContentKind, response: UpstreamResponse) -> ProxyResponse {
        let mut headers = HeaderMap::new();
        for name in PASSTHROUGH_HEADERS {
            if let Some(value) = response.headers.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        headers
            .entry(header::CONTENT_TYPE)
            .or_insert_with(|| HeaderValue::from_static(kind.default_content_type()));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        ProxyResponse {
            status: response.status,
            kind,
            headers,
            body: ProxyBody::Stream(response.body),
        }
    }
}

#[async_trait]
impl RelayServiceTrait for RelayService {
    async fn relay(&self, url: &str, client_headers: &HeaderMap) -> AppResult<ProxyResponse> {
        let target = Url::parse(url).map_err(|e| {
            error!("Failed to parse relay target {}: {}", url, e);
            Error::BadRequest(format!("Invalid URL: {}", e))
        })?;

        let identity = random_identity();
        let upstream_headers = Self::upstream_headers(&target, &identity, client_headers);

        debug!("Relaying {}", url);
        let response = self
            .fetcher
            .fetch_stream(url, upstream_headers, self.timeout)
            .await?;

        let status = response.status;
        debug!("Received response with status: {}", status);

        if status == StatusCode::FORBIDDEN {
            warn!("upstream refused relay for {}", url);
            return Err(Error::access_denied(url));
        }

        if status.is_server_error() {
            error!("upstream {} returned {}", url, status);
            return Err(Error::Upstream(format!("upstream returned {}", status)));
        }

        if !status.is_success() {
            // 4xx still goes back to the player as is, it knows what a 404 segment means
            info!("relaying {} from upstream for {}", status, url);
        }

        let content_type = response
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let kind = ContentKind::classify(content_type.as_deref(), url);
        debug!("Content-Type: {:?}, classified as {:?}", content_type, kind);

        // a 206 playlist is a fragment, it goes back untouched
        if kind == ContentKind::Manifest
            && status.is_success()
            && status != StatusCode::PARTIAL_CONTENT
        {
            return self.relay_manifest(&target, content_type, response).await;
        }

        Ok(Self::relay_stream(kind, response))
    }
}
