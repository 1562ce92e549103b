// the relay route. Fetching and rewriting is the relay service's job, this file turns its answer
// into a response a browser player will accept
use axum::{
    Extension, Router,
    body::Body,
    extract::Query,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use serde::Deserialize;
use tracing::{debug, error};

use crate::server::{
    error::{AppResult, Error},
    services::{
        app_services::AppServices,
        relay_services::{ProxyBody, ProxyResponse},
    },
    utils::encoding_utils::ContentEncoding,
};

#[derive(Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

pub struct ProxyController;

impl ProxyController {
    /// mounted wherever the config says, rewritten manifests point back at the same path
    pub fn app(relay_route: &str) -> Router {
        Router::new().route(relay_route, get(Self::proxy_get).options(Self::proxy_options))
    }

    /// any page can embed a player pointed at us
    fn apply_cors_headers(headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Range, Content-Type"),
        );
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Content-Length, Content-Range, Accept-Ranges"),
        );
    }

    /// build m3u8 response with proper headers and optional compression
    fn build_manifest_response(
        status: StatusCode,
        mut response_headers: HeaderMap,
        processed_body: &str,
        client_headers: &HeaderMap,
    ) -> AppResult<Response> {
        // apple hls likes gzip, not zstd, so the client decides
        let encoding = ContentEncoding::from_accept_encoding(
            client_headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        let response_body = encoding.compress(processed_body.as_bytes()).map_err(|e| {
            error!("Failed to compress response with {:?}: {}", encoding, e);
            Error::InternalServerErrorWithContext("Failed to compress response".to_string())
        })?;

        if let Some(enc_header) = encoding.as_header_value() {
            debug!(
                "Compressed M3U8 with {:?} from {} to {} bytes",
                encoding,
                processed_body.len(),
                response_body.len()
            );
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static(enc_header));
        }

        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(response_body.len()));
        response_headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        Self::apply_cors_headers(&mut response_headers);

        Ok((status, response_headers, response_body).into_response())
    }

    fn build_stream_response(relayed: ProxyResponse) -> Response {
        let ProxyResponse {
            status,
            mut headers,
            body,
            ..
        } = relayed;

        let body = match body {
            // dropping the body (client gone) drops the upstream stream with it
            ProxyBody::Stream(stream) => Body::from_stream(stream),
            ProxyBody::Manifest(text) => Body::from(text),
        };

        Self::apply_cors_headers(&mut headers);
        (status, headers, body).into_response()
    }

    /// errors get the same cors headers as relayed content, whatever the router-wide origin is
    async fn proxy_get(
        Extension(services): Extension<AppServices>,
        Query(params): Query<ProxyQuery>,
        headers: HeaderMap,
    ) -> Response {
        match Self::relay_response(&services, params, &headers).await {
            Ok(response) => response,
            Err(e) => {
                let mut response = e.into_response();
                Self::apply_cors_headers(response.headers_mut());
                response
            }
        }
    }

    async fn relay_response(
        services: &AppServices,
        params: ProxyQuery,
        headers: &HeaderMap,
    ) -> AppResult<Response> {
        let url_param = params.url.filter(|u| !u.trim().is_empty()).ok_or_else(|| {
            Error::BadRequest(format!(
                "Query parameter \"url\" is required, usage: GET {}?url=<m3u8-or-segment-url>",
                services.config.relay_route
            ))
        })?;

        let target_url = Self::decode_url(&url_param)?;

        if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
            return Err(Error::BadRequest("Invalid URL format".to_string()));
        }

        debug!("Proxying: {}", target_url);

        let relayed = services.relay.relay(&target_url, headers).await.map_err(|e| {
            error!("Proxy error for {}: {}", target_url, e);
            e
        })?;

        if let ProxyBody::Manifest(text) = &relayed.body {
            return Self::build_manifest_response(
                relayed.status,
                relayed.headers.clone(),
                text,
                headers,
            );
        }

        Ok(Self::build_stream_response(relayed))
    }

    async fn proxy_options() -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        Self::apply_cors_headers(&mut headers);
        (StatusCode::OK, headers)
    }

    /// rewritten manifests send percent-encoded urls, unpadded url-safe base64 is accepted too
    pub fn decode_url(url_param: &str) -> AppResult<String> {
        if url_param.starts_with("http://") || url_param.starts_with("https://") {
            return Ok(url_param.to_string());
        }

        if url_param.starts_with("http%3A") || url_param.starts_with("https%3A") {
            return urlencoding::decode(url_param)
                .map(|s| s.to_string())
                .map_err(|e| {
                    error!("Failed to decode URL: {}", e);
                    Error::BadRequest("Invalid URL encoding".to_string())
                });
        }

        let mut padded = url_param.to_string();
        while padded.len() % 4 != 0 {
            padded.push('=');
        }

        URL_SAFE
            .decode(&padded)
            .map_err(|e| {
                error!("Failed to decode base64: {}", e);
                Error::BadRequest("Invalid URL encoding".to_string())
            })
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| {
                    error!("Failed to parse UTF-8: {}", e);
                    Error::BadRequest("Invalid URL encoding".to_string())
                })
            })
    }
}
