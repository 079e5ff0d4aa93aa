//! Shared application state handed to every handler.

use std::sync::Arc;

use sluice_core::{Config, FieldSigner};
use sluice_processing::ZipMetadataRunner;
use sluice_storage::Storage;

use crate::preauth::PreAuthorizer;
use crate::upstream::Upstream;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Configured backend, used when pre-authorization names no temp path.
    pub storage: Arc<dyn Storage>,
    pub signer: FieldSigner,
    pub preauthorizer: Arc<dyn PreAuthorizer>,
    pub upstream: Arc<dyn Upstream>,
    /// Shared by every artifacts request; carries the metrics sink.
    pub runner: Arc<ZipMetadataRunner>,
}
