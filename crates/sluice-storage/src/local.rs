use crate::traits::{sanitize_name, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use sluice_core::RequestContext;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Local filesystem storage for request-scoped temp uploads
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `base_path`, creating it if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Unique path for one upload. Names never share a file even when the
    /// client repeats a filename.
    fn object_path(&self, name: &str) -> StorageResult<PathBuf> {
        let file_name = sanitize_name(name)?;
        Ok(self
            .base_path
            .join(format!("{}-{}", Uuid::new_v4(), file_name)))
    }
}

/// Remove `path` once the request ends.
fn reclaim_on_cancel(ctx: &RequestContext, path: PathBuf) {
    let cancelled = ctx.cancelled_owned();
    let request_id = ctx.request_id();
    tokio::spawn(async move {
        cancelled.await;
        match fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(
                request_id = %request_id,
                path = %path.display(),
                "Removed request temp file"
            ),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                request_id = %request_id,
                error = %e,
                path = %path.display(),
                "Failed to remove request temp file"
            ),
        }
    });
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_stream(
        &self,
        ctx: &RequestContext,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<StoredObject> {
        let path = self.object_path(name)?;
        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;

        // Registered before the copy so a cancelled, half-written file is
        // reclaimed too.
        reclaim_on_cancel(ctx, path.clone());

        let size = match tokio::io::copy(reader, &mut file).await {
            Ok(size) => size,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::info!(
            request_id = %ctx.request_id(),
            path = %path.display(),
            name = %name,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream upload successful"
        );

        Ok(StoredObject::local(path))
    }

    async fn delete(&self, object: &StoredObject) -> StorageResult<()> {
        let Some(path) = object.local_path.as_ref() else {
            return Ok(());
        };

        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
