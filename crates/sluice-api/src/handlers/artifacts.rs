use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::response::Response;
use serde::Deserialize;
use sluice_processing::{ArtifactFormat, ArtifactsUploadProcessor, UploadProcessor};

use super::{destinations, forward_intercepted, RequestScope};
use crate::error::HttpAppError;
use crate::intercept::{cancellable, intercept, InterceptLimits, Intercepted};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ArtifactsQuery {
    #[serde(default)]
    artifact_format: String,
}

/// Job artifacts upload.
///
/// The archive is stored, its metadata extracted when the declared format
/// allows it, and the rewritten request forwarded to the upstream.
#[tracing::instrument(
    skip(state, job_id, query, request),
    fields(job_id = %job_id, artifact_format = %query.artifact_format)
)]
pub async fn upload_artifacts(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<ArtifactsQuery>,
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
    let (destination, metadata_destination) = destinations(&state, &auth).await?;

    let mut processor = ArtifactsUploadProcessor::new(
        ArtifactFormat::parse(&query.artifact_format),
        metadata_destination,
        state.runner.clone(),
        state.signer.clone(),
    )
    .with_index_processing(auth.process_index);

    let limits = InterceptLimits {
        max_files: auth
            .maximum_files
            .unwrap_or_else(|| state.config.max_files_per_request()),
    };
    let intercepted = intercept(
        ctx,
        &parts.headers,
        body,
        &mut processor,
        &destination,
        &state.signer,
        limits,
    )
    .await?;

    if let Intercepted::Rewritten(rewritten) = &intercepted {
        tracing::info!(
            request_id = %ctx.request_id(),
            processor = processor.name(),
            files = rewritten.file_count,
            tracked = processor.tracker().len(),
            "Artifacts upload intercepted"
        );
    }

    cancellable(ctx, forward_intercepted(&state, parts, intercepted)).await?
}
