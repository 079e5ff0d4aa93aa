//! Sluice Upload Processing Library
//!
//! Per-request upload processors driven by the interception engine, the
//! artifacts processor with its zip-metadata subprocess, and the content
//! transforms applied to file parts before they reach storage.

pub mod archive;
pub mod error;
pub mod metrics;
pub mod transform;
pub mod upload;

// Re-export commonly used types
pub use archive::{FailureKind, ZipMetadataRunner, ZipOutcome, ZipRun};
pub use error::ProcessingError;
pub use metrics::{MetricsSink, NoopMetricsSink, OtelMetricsSink};
pub use transform::IndexTransform;
pub use upload::{
    ArtifactFormat, ArtifactsUploadProcessor, MultipartWriter, SavedFileTracker, UploadProcessor,
};
