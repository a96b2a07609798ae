//! Upstream request forwarding.
//!
//! Rebuilds the inbound request against the upstream base URL with app
//! credentials, forwards it, and hands back status, headers, and body. Bodies
//! stream in both directions unless the caller needs the response buffered
//! for collection filtering.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::AppCredentials;
use crate::config::GraphConfig;
use crate::{Error, Result};

/// Correlation header attached to every upstream call.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Headers never forwarded upstream. `authorization` is replaced with the app
/// credential, `content-length` is recomputed by the client.
const REQUEST_STRIP: &[&str] = &[
    "host",
    "authorization",
    "content-length",
    "transfer-encoding",
    "connection",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Headers dropped from the upstream response copy; the serving layer
/// recomputes framing and content type.
const RESPONSE_STRIP: &[&str] = &[
    "content-length",
    "content-type",
    "transfer-encoding",
    "connection",
];

/// Response from an upstream call.
pub struct UpstreamResponse {
    /// Upstream HTTP status
    pub status: StatusCode,
    /// Propagated headers, already stripped of framing headers
    pub headers: HeaderMap,
    /// Upstream content type, kept aside for the serving layer
    pub content_type: Option<HeaderValue>,
    /// Response body
    pub body: UpstreamBody,
}

/// Buffered or streaming response body.
pub enum UpstreamBody {
    /// Fully read body, used when the response must be filtered
    Buffered(Bytes),
    /// Passthrough stream
    Stream(Body),
}

/// Forwards requests to the upstream API with app credentials.
pub struct Forwarder {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<AppCredentials>,
}

impl Forwarder {
    /// Create a forwarder with the configured per-call deadline.
    pub fn new(config: &GraphConfig, credentials: Arc<AppCredentials>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Forward a request to `{base}/{version}/{path}?{query}`.
    ///
    /// With `buffer` set the response body is read fully (the caller intends
    /// to filter it); otherwise it is streamed through.
    #[allow(clippy::too_many_arguments)]
    pub async fn forward(
        &self,
        method: Method,
        version: &str,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Body,
        buffer: bool,
    ) -> Result<UpstreamResponse> {
        let mut url = format!("{}/{version}/{path}", self.base_url);
        if let Some(q) = query {
            url.push('?');
            url.push_str(q);
        }

        let bearer = self.credentials.bearer().await?;
        let mut upstream_headers = copy_request_headers(headers);
        let correlation = correlation_id(headers);
        upstream_headers.insert(
            HeaderName::from_static(CORRELATION_HEADER),
            correlation.clone(),
        );

        debug!(method = %method, url = %url, correlation = ?correlation, "Forwarding upstream");

        let response = self
            .http
            .request(method, &url)
            .headers(upstream_headers)
            .bearer_auth(bearer)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout(url.clone())
                } else {
                    Error::UpstreamUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let headers = copy_response_headers(response.headers());

        let body = if buffer {
            let bytes = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout(url.clone())
                } else {
                    Error::UpstreamUnavailable(e.to_string())
                }
            })?;
            UpstreamBody::Buffered(bytes)
        } else {
            UpstreamBody::Stream(Body::from_stream(response.bytes_stream()))
        };

        Ok(UpstreamResponse {
            status,
            headers,
            content_type,
            body,
        })
    }
}

/// Copy inbound headers, dropping hop-by-hop and replaced entries.
fn copy_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if REQUEST_STRIP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Copy upstream response headers, dropping framing headers.
fn copy_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if RESPONSE_STRIP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Propagate the client's correlation id, or generate one.
fn correlation_id(headers: &HeaderMap) -> HeaderValue {
    headers
        .get(CORRELATION_HEADER)
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("invalid"))
        })
}
