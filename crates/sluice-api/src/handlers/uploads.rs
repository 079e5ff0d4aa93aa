use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use sluice_processing::{SavedFileTracker, UploadProcessor};

use super::{destinations, forward_intercepted, RequestScope};
use crate::error::HttpAppError;
use crate::intercept::{cancellable, intercept, InterceptLimits};
use crate::state::AppState;

/// Generic upload acceleration: every file part is stored and replaced by
/// its location, with no further processing.
pub async fn upload_files(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, HttpAppError> {
    let scope = RequestScope::new(state.config.request_timeout());
    let ctx = &scope.ctx;
    let (parts, body) = request.into_parts();

    let auth = cancellable(
        ctx,
        state.preauthorizer.authorize(parts.uri.path(), &parts.headers),
    )
    .await??;
    let (destination, _) = destinations(&state, &auth).await?;

    let mut tracker = SavedFileTracker::new();
    let limits = InterceptLimits {
        max_files: auth
            .maximum_files
            .unwrap_or_else(|| state.config.max_files_per_request()),
    };
    let intercepted = intercept(
        ctx,
        &parts.headers,
        body,
        &mut tracker,
        &destination,
        &state.signer,
        limits,
    )
    .await?;

    tracing::debug!(
        request_id = %ctx.request_id(),
        processor = tracker.name(),
        path = %parts.uri.path(),
        files = tracker.len(),
        "Upload intercepted"
    );

    cancellable(ctx, forward_intercepted(&state, parts, intercepted)).await?
}
