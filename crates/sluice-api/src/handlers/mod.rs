//! HTTP handlers.

pub mod artifacts;
pub mod health;
pub mod proxy;
pub mod uploads;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use http::{header, request::Parts, HeaderName, HeaderValue, Request};
use sluice_core::constants::REWRITTEN_FIELDS_HEADER;
use sluice_core::{AppError, RequestContext};
use sluice_storage::{Destination, DestinationOptions, LocalStorage, Storage};
use tokio_util::sync::DropGuard;

use crate::error::HttpAppError;
use crate::intercept::Intercepted;
use crate::preauth::Authorization;
use crate::state::AppState;

/// Context for one request plus the guard that ends it.
///
/// Dropping the scope cancels the context. That happens when the handler
/// returns and when the client goes away mid-request, and it is what
/// reclaims temp files.
pub(crate) struct RequestScope {
    pub ctx: RequestContext,
    _guard: DropGuard,
}

impl RequestScope {
    pub fn new(deadline: Duration) -> Self {
        let root = RequestContext::new();
        Self {
            ctx: root.with_timeout(deadline),
            _guard: root.drop_guard(),
        }
    }
}

/// Destination for uploaded files and one for derived files, which have no
/// size limit of their own.
pub(crate) async fn destinations(
    state: &AppState,
    auth: &Authorization,
) -> Result<(Destination, Destination), HttpAppError> {
    let storage: Arc<dyn Storage> = match &auth.temp_path {
        Some(path) => Arc::new(LocalStorage::new(path.clone()).await?),
        None => state.storage.clone(),
    };
    Ok((
        Destination::new(
            storage.clone(),
            DestinationOptions {
                max_size: auth.max_size,
            },
        ),
        Destination::new(storage, DestinationOptions::default()),
    ))
}

fn header_value(value: &str) -> Result<HeaderValue, HttpAppError> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Internal(format!("invalid header value: {}", e)).into())
}

/// Send the (possibly rewritten) request to the upstream.
pub(crate) async fn forward_intercepted(
    state: &AppState,
    mut parts: Parts,
    intercepted: Intercepted,
) -> Result<Response, HttpAppError> {
    let request = match intercepted {
        Intercepted::Passthrough(body) => Request::from_parts(parts, body),
        Intercepted::Rewritten(rewritten) => {
            let fields_header = HeaderName::from_bytes(REWRITTEN_FIELDS_HEADER.as_bytes())
                .map_err(|e| AppError::Internal(e.to_string()))?;

            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .insert(header::CONTENT_TYPE, header_value(&rewritten.content_type)?);
            parts
                .headers
                .insert(fields_header, header_value(&rewritten.signed_fields)?);
            Request::from_parts(parts, Body::from(rewritten.body))
        }
    };

    Ok(state.upstream.forward(request).await?)
}
