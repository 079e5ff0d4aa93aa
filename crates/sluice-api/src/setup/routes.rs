//! Route configuration and setup

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{artifacts, health, proxy, uploads};
use crate::state::AppState;

/// Body cap for requests that are proxied without interception.
const PROXY_BODY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

pub fn setup_routes(state: Arc<AppState>) -> Router {
    // Upload bodies are bounded per file by the pre-authorized max size.
    let upload_routes = Router::new()
        .route(
            "/api/v4/jobs/{id}/artifacts",
            post(artifacts::upload_artifacts).put(artifacts::upload_artifacts),
        )
        .route("/uploads/{*path}", post(uploads::upload_files));

    let passthrough_routes = Router::new()
        .route("/health", get(health::health))
        .fallback(proxy::proxy)
        .layer(RequestBodyLimitLayer::new(PROXY_BODY_LIMIT_BYTES));

    upload_routes
        .merge(passthrough_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
