//! Zip artifact analysis: the exit-code protocol, the subprocess runner
//! that speaks it, and the metadata generator behind the
//! `sluice-zip-metadata` binary.

pub mod metadata;
pub mod outcome;
pub mod runner;

pub use metadata::{generate_metadata, MetadataError, MetadataLimits, METADATA_HEADER};
pub use outcome::{FailureKind, ZipOutcome};
pub use runner::{ZipMetadataRunner, ZipRun};
