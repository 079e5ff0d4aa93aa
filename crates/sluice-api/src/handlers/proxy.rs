use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;

use crate::error::HttpAppError;
use crate::state::AppState;

/// Everything that is not an upload goes straight to the upstream.
pub async fn proxy(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, HttpAppError> {
    Ok(state.upstream.forward(request).await?)
}
