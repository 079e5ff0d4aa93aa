//! Application setup and initialization

pub mod routes;
pub mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use sluice_core::{Config, FieldSigner};
use sluice_processing::{MetricsSink, OtelMetricsSink, ZipMetadataRunner};
use sluice_storage::create_storage;

use crate::preauth::HttpPreAuthorizer;
use crate::state::AppState;
use crate::upstream::HttpUpstream;

/// Build the state and router from a validated configuration.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    let storage = create_storage(&config)
        .await
        .context("Failed to initialize storage backend")?;

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let metrics: Arc<dyn MetricsSink> = Arc::new(OtelMetricsSink::global());
    let runner = Arc::new(ZipMetadataRunner::new(
        config.zip_metadata_command(),
        config.zip_metadata_timeout(),
        metrics,
    ));

    let state = Arc::new(AppState {
        signer: FieldSigner::new(config.signing_secret()),
        preauthorizer: Arc::new(HttpPreAuthorizer::new(
            client.clone(),
            config.upstream_url(),
        )),
        upstream: Arc::new(HttpUpstream::new(client, config.upstream_url())),
        storage,
        runner,
        config,
    });

    tracing::info!(
        backend = %state.storage.backend_type(),
        upstream = %state.config.upstream_url(),
        zip_metadata_command = %state.config.zip_metadata_command(),
        "Application state initialized"
    );

    let router = routes::setup_routes(state.clone());
    Ok((state, router))
}
