//! Pre-authorization of upload requests by the application server.

use std::path::PathBuf;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use sluice_core::AppError;

use crate::upstream::copy_headers;

/// What the application server allows for one upload request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Authorization {
    /// Local directory for the uploaded files. When absent the configured
    /// storage backend is used.
    pub temp_path: Option<PathBuf>,
    /// Upper bound for each stored file, in bytes.
    pub max_size: Option<u64>,
    /// Overrides the configured file-part limit.
    pub maximum_files: Option<usize>,
    /// Route every file part through the index transform.
    pub process_index: bool,
}

#[async_trait]
pub trait PreAuthorizer: Send + Sync {
    async fn authorize(&self, path: &str, headers: &HeaderMap) -> Result<Authorization, AppError>;
}

/// Asks `{upstream}{path}/authorize` with the client's headers.
pub struct HttpPreAuthorizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPreAuthorizer {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn rejection(status: StatusCode, body: String) -> AppError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED => AppError::Unauthorized(message),
        StatusCode::FORBIDDEN => AppError::Forbidden(message),
        s if s.is_client_error() => AppError::BadRequest(message),
        _ => AppError::Upstream(format!("pre-authorization failed: {}", message)),
    }
}

#[async_trait]
impl PreAuthorizer for HttpPreAuthorizer {
    async fn authorize(&self, path: &str, headers: &HeaderMap) -> Result<Authorization, AppError> {
        let url = format!("{}{}/authorize", self.base_url, path.trim_end_matches('/'));

        let mut forwarded = HeaderMap::new();
        copy_headers(headers, &mut forwarded);
        forwarded.remove(http::header::CONTENT_TYPE);

        let response = self
            .client
            .post(&url)
            .headers(forwarded)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("pre-authorization request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(url = %url, status = status.as_u16(), "Upload not authorized");
            return Err(rejection(status, body));
        }

        response
            .json::<Authorization>()
            .await
            .map_err(|e| AppError::Upstream(format!("invalid pre-authorization response: {}", e)))
    }
}
