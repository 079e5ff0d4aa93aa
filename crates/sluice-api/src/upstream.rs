//! Forwarding to the application server.

use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::{header, HeaderMap, HeaderName, Request};
use sluice_core::AppError;

/// Headers that describe one connection and must not be forwarded.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::HOST
        || name == header::TRANSFER_ENCODING
        || name == header::CONTENT_LENGTH
        || name == header::TE
        || name == header::TRAILER
        || name == header::UPGRADE
        || name == header::PROXY_AUTHORIZATION
        || name.as_str() == "keep-alive"
}

pub(crate) fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) {
            to.append(name.clone(), value.clone());
        }
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request` to the application server and relay its answer.
    async fn forward(&self, request: Request<Body>) -> Result<Response, AppError>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: Request<Body>) -> Result<Response, AppError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut headers = HeaderMap::new();
        copy_headers(&parts.headers, &mut headers);

        let upstream_response = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{} {}: {}", parts.method, url, e)))?;

        let status = upstream_response.status();
        let mut response_headers = HeaderMap::new();
        copy_headers(upstream_response.headers(), &mut response_headers);

        tracing::debug!(
            method = %parts.method,
            url = %url,
            status = status.as_u16(),
            "Upstream responded"
        );

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}
