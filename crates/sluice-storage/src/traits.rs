use async_trait::async_trait;
use sluice_core::RequestContext;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::StorageBackend;

/// Owned byte stream passed between the interception engine, content
/// transforms and storage.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Entity is too large: limit is {max_size} bytes")]
    EntityTooLarge { max_size: u64 },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Where a backend put an object. Exactly one of `local_path` and
/// `remote_url` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub local_path: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub remote_id: Option<String>,
}

impl StoredObject {
    pub fn local(path: PathBuf) -> Self {
        Self {
            local_path: Some(path),
            ..Default::default()
        }
    }

    pub fn remote(url: String, id: String) -> Self {
        Self {
            local_path: None,
            remote_url: Some(url),
            remote_id: Some(id),
        }
    }
}

/// Storage abstraction trait
///
/// Backends consume the reader to EOF and return where the bytes landed.
/// They must arrange for the object to be removed once `ctx` is cancelled.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stream `reader` into the backend under the logical `name`.
    async fn upload_stream(
        &self,
        ctx: &RequestContext,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<StoredObject>;

    /// Remove a previously stored object. Missing objects are not an error.
    async fn delete(&self, object: &StoredObject) -> StorageResult<()>;

    fn backend_type(&self) -> StorageBackend;
}

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directories are dropped, so `/home/ci/artifacts.zip` and
/// `dist\artifacts.zip` both become `artifacts.zip`. Only a name that is
/// nothing but `.` or `..` is refused.
pub(crate) fn sanitize_name(name: &str) -> StorageResult<String> {
    let base = name
        .rsplit(['/', '\\'])
        .find(|component| !component.is_empty())
        .unwrap_or_default();

    if base == "." || base == ".." {
        return Err(StorageError::InvalidKey(format!(
            "Object name does not name a file: {}",
            name
        )));
    }

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        Ok("upload".to_string())
    } else {
        Ok(cleaned)
    }
}
