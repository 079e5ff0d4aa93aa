//! HTTP error response conversion
//!
//! Handlers return `Result<Response, HttpAppError>`. Storage and processing
//! errors convert into `HttpAppError` so every failure renders the same way
//! (status, JSON body, one log line at the right level).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sluice_core::{AppError, ErrorMetadata, LogLevel};
use sluice_processing::ProcessingError;
use sluice_storage::StorageError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Wrapper so `IntoResponse` can be implemented for the core error type.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::from(err))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Request failed");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Request failed");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Request failed");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .map(|env| env.eq_ignore_ascii_case("production") || env.eq_ignore_ascii_case("prod"))
        .unwrap_or(false)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        // Details only outside production, and never for sensitive errors.
        let show_details = !is_production_env() && !app_error.is_sensitive();
        let body = ErrorResponse {
            error: app_error.client_message(),
            details: show_details.then(|| app_error.detailed_message()),
            error_type: show_details.then(|| app_error.error_type().to_string()),
            code: app_error.error_code().to_string(),
            recoverable: app_error.is_recoverable(),
            suggested_action: app_error.suggested_action().map(String::from),
        };

        (status, Json(body)).into_response()
    }
}

fn storage_app_error(err: StorageError) -> AppError {
    match err {
        StorageError::Cancelled => AppError::ContextEnded(err.to_string()),
        StorageError::EntityTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
        StorageError::SizeMismatch { .. } => AppError::BadRequest(err.to_string()),
        StorageError::InvalidKey(msg) => AppError::BadRequest(msg),
        StorageError::ConfigError(msg) => AppError::Internal(msg),
        other => AppError::Storage(other.to_string()),
    }
}

impl From<StorageError> for HttpAppError {
    fn from(err: StorageError) -> Self {
        HttpAppError(storage_app_error(err))
    }
}

impl From<ProcessingError> for HttpAppError {
    fn from(err: ProcessingError) -> Self {
        let app = match err {
            ProcessingError::InvalidField(_)
            | ProcessingError::MultipleFiles
            | ProcessingError::DuplicateField(_) => AppError::BadRequest(err.to_string()),
            ProcessingError::ContextEnded => AppError::ContextEnded(err.to_string()),
            ProcessingError::BadMetadata => AppError::BadMetadata(err.to_string()),
            ProcessingError::Storage(inner) => storage_app_error(inner),
            ProcessingError::Signing(inner) => AppError::from(inner),
            other => AppError::Processing(other.to_string()),
        };
        HttpAppError(app)
    }
}
