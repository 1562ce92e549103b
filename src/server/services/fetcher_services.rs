// the only place that talks to the network, everything above it goes through the trait so tests
// can hand back canned pages
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use mockall::automock;
use reqwest::{
    StatusCode,
    header::{self, HeaderMap},
};
use tracing::{debug, error, warn};
use url::Url;

use crate::{
    config::AppConfig,
    server::{
        error::{AppResult, Error},
        utils::identity_utils::random_identity,
    },
};

pub type DynRemoteFetcher = Arc<dyn RemoteFetcherTrait + Send + Sync>;

pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// ddos-guard lets a client through once these exist, empty values are fine
const CHALLENGE_COOKIES: &str = "__ddg1_=;__ddg2_=";

const CHALLENGE_MARKERS: [&str; 4] = ["ddos-guard", "cf-chl", "challenge-platform", "Just a moment"];

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub referer: Option<String>,
}

/// raw upstream answer, body is left unread so segments can stream straight through
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
    /// where the request ended up after redirects, none when it was not followed
    pub final_url: Option<Url>,
}

impl UpstreamResponse {
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        Self {
            status,
            headers,
            body: futures::stream::once(async move { Ok(bytes) }).boxed(),
            final_url: None,
        }
    }

    pub fn redirected_to(mut self, url: Url) -> Self {
        self.final_url = Some(url);
        self
    }

    /// drain the body, refusing anything over `limit` bytes
    pub async fn collect(self, limit: usize) -> AppResult<Vec<u8>> {
        let mut collected: Vec<u8> = Vec::new();
        let mut body = self.body;

        while let Some(chunk) = body.try_next().await.map_err(|e| {
            error!("Failed to read upstream body: {}", e);
            Error::Upstream(format!("Failed to read upstream body: {}", e))
        })? {
            if collected.len() + chunk.len() > limit {
                return Err(Error::Upstream(format!(
                    "upstream body larger than {} bytes",
                    limit
                )));
            }
            collected.extend_from_slice(&chunk);
        }

        Ok(collected)
    }
}

#[automock]
#[async_trait]
pub trait RemoteFetcherTrait {
    /// challenge aware GET for catalog json and html, non 2xx is an error
    async fn fetch_text(&self, url: &str, options: FetchOptions) -> AppResult<String>;

    /// GET with caller supplied headers, every status comes back as is
    async fn fetch_stream(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> AppResult<UpstreamResponse>;
}

pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.relay_max_redirects))
            .timeout(config.fetch_timeout())
            .connect_timeout(Duration::from_secs(10))
            .http2_adaptive_window(true)
            .build()
            .map_err(|e| {
                error!("failed to build http client: {}", e);
                Error::InternalServerErrorWithContext(format!("failed to build http client: {}", e))
            })?;

        Ok(Self { http_client })
    }

    fn looks_like_challenge(status: StatusCode, body: &str) -> bool {
        matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) && CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
    }
}

#[async_trait]
impl RemoteFetcherTrait for HttpFetcher {
    async fn fetch_text(&self, url: &str, options: FetchOptions) -> AppResult<String> {
        let identity = random_identity();
        debug!("fetching {} as '{}'", url, identity.user_agent);

        let mut request_builder = self
            .http_client
            .get(url)
            .timeout(options.timeout)
            .header(header::USER_AGENT, identity.user_agent)
            .header(header::ACCEPT_LANGUAGE, identity.accept_language)
            .header(
                header::ACCEPT,
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            )
            .header(header::COOKIE, CHALLENGE_COOKIES);

        if let Some(referer) = options.referer.as_deref() {
            request_builder = request_builder.header(header::REFERER, referer);
        }

        let response = request_builder.send().await.map_err(|e| {
            error!("request to {} failed: {}", url, e);
            Error::Upstream(format!("request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            error!("failed to read body from {}: {}", url, e);
            Error::Upstream(format!("failed to read body from {}: {}", url, e))
        })?;

        if Self::looks_like_challenge(status, &body) {
            warn!("{} answered with an anti-bot challenge ({})", url, status);
            return Err(Error::Upstream(format!(
                "{} is behind an unsolved anti-bot challenge ({})",
                url, status
            )));
        }

        if !status.is_success() {
            error!("{} returned {}", url, status);
            return Err(Error::Upstream(format!("{} returned {}", url, status)));
        }

        debug!("fetched {} ({} bytes)", url, body.len());
        Ok(body)
    }

    async fn fetch_stream(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> AppResult<UpstreamResponse> {
        let response = self
            .http_client
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                error!("Request failed: {}", e);
                Error::Upstream(format!("Request failed: {}", e))
            })?;

        debug!("Received response with status: {}", response.status());

        let final_url = response.url().clone();
        if final_url.as_str() != url {
            debug!("{} redirected to {}", url, final_url);
        }

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            final_url: Some(final_url),
            body: response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed(),
        })
    }
}
