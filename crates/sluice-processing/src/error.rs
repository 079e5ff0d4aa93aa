use std::io;
use std::time::Duration;

use sluice_core::SigningError;
use sluice_storage::StorageError;

use crate::archive::ZipOutcome;

/// Errors raised while processing one upload.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("invalid form field: {0:?}")]
    InvalidField(String),

    #[error("artifacts request contains more than one file")]
    MultipleFiles,

    #[error("field {0:?} was uploaded more than once")]
    DuplicateField(String),

    #[error("request context ended")]
    ContextEnded,

    #[error("zip artifacts metadata invalid")]
    BadMetadata,

    #[error("uploaded file has neither a local path nor a remote url")]
    MissingLocator,

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} failed: {outcome}")]
    Subprocess { command: String, outcome: ZipOutcome },

    #[error("{command} did not finish within {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("content transform failed: {0}")]
    Transform(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessingError {
    /// Protocol violations are the client's fault and never reach a
    /// subprocess or storage.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProcessingError::InvalidField(_)
                | ProcessingError::MultipleFiles
                | ProcessingError::DuplicateField(_)
        )
    }
}
