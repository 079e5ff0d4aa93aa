//! Streaming uploads into a storage backend and describing the result.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sluice_core::constants::UPLOAD_TOKEN_SUFFIX;
use sluice_core::{FieldSigner, RequestContext, SigningError};
use tokio::io::AsyncRead;

use crate::hashing::HashingReader;
use crate::traits::{Storage, StorageError, StorageResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct DestinationOptions {
    /// Uploads larger than this fail with `EntityTooLarge`.
    pub max_size: Option<u64>,
}

/// A persisted upload: where it landed plus the size and digests observed
/// while streaming it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub name: String,
    pub local_path: Option<PathBuf>,
    pub remote_url: Option<String>,
    pub remote_id: Option<String>,
    pub size: u64,
    pub sha256: String,
    pub sha512: String,
    pub upload_duration: Duration,
}

impl FileHandle {
    /// Local path when the file has a local copy, otherwise the remote URL.
    pub fn locator(&self) -> Option<String> {
        self.local_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .or_else(|| self.remote_url.clone())
    }

    /// Fields describing this file to the upstream application, namespaced
    /// under `prefix`. The last field is a signed token over all the others.
    pub fn finalize_fields(
        &self,
        prefix: &str,
        signer: &FieldSigner,
    ) -> Result<BTreeMap<String, String>, SigningError> {
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), self.name.clone());
        if let Some(path) = &self.local_path {
            data.insert("path".to_string(), path.to_string_lossy().into_owned());
        }
        if let Some(url) = &self.remote_url {
            data.insert("remote_url".to_string(), url.clone());
        }
        if let Some(id) = &self.remote_id {
            data.insert("remote_id".to_string(), id.clone());
        }
        data.insert("size".to_string(), self.size.to_string());
        data.insert("sha256".to_string(), self.sha256.clone());
        data.insert("sha512".to_string(), self.sha512.clone());
        data.insert(
            "upload_duration".to_string(),
            format!("{:.6}", self.upload_duration.as_secs_f64()),
        );

        let token = signer.sign(&data)?;

        let mut fields: BTreeMap<String, String> = data
            .into_iter()
            .map(|(key, value)| (format!("{}.{}", prefix, key), value))
            .collect();
        fields.insert(format!("{}.{}", prefix, UPLOAD_TOKEN_SUFFIX), token);
        Ok(fields)
    }
}

/// Storage backend plus per-request upload policy.
#[derive(Clone)]
pub struct Destination {
    storage: Arc<dyn Storage>,
    options: DestinationOptions,
}

impl Destination {
    pub fn new(storage: Arc<dyn Storage>, options: DestinationOptions) -> Self {
        Self { storage, options }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stream `reader` to storage under `name`.
    ///
    /// Returns `Cancelled` as soon as `ctx` fires, even while the backend is
    /// blocked on a write. When `expected_size` is given the stored byte
    /// count must match it.
    pub async fn upload<R>(
        &self,
        ctx: &RequestContext,
        name: &str,
        expected_size: Option<u64>,
        reader: R,
    ) -> StorageResult<FileHandle>
    where
        R: AsyncRead + Send + Unpin,
    {
        if ctx.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let start = Instant::now();
        let mut hashing = HashingReader::new(reader, self.options.max_size);

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(StorageError::Cancelled),
            result = self.storage.upload_stream(ctx, name, &mut hashing) => result,
        };

        let stored = match result {
            Ok(stored) => stored,
            Err(_) if hashing.limit_exceeded() => {
                return Err(StorageError::EntityTooLarge {
                    max_size: self.options.max_size.unwrap_or_default(),
                })
            }
            Err(e) => return Err(e),
        };

        let summary = hashing.finish();
        if let Some(expected) = expected_size {
            if expected != summary.size {
                let _ = self.storage.delete(&stored).await;
                return Err(StorageError::SizeMismatch {
                    expected,
                    actual: summary.size,
                });
            }
        }

        Ok(FileHandle {
            name: name.to_string(),
            local_path: stored.local_path,
            remote_url: stored.remote_url,
            remote_id: stored.remote_id,
            size: summary.size,
            sha256: summary.sha256,
            sha512: summary.sha512,
            upload_duration: start.elapsed(),
        })
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::traits::StoredObject;
    use crate::{LocalStorage, StorageBackend};
    use async_trait::async_trait;
    use tempfile::tempdir;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn local_destination(dir: &std::path::Path, max_size: Option<u64>) -> Destination {
        let storage = LocalStorage::new(dir).await.unwrap();
        Destination::new(Arc::new(storage), DestinationOptions { max_size })
    }

    #[tokio::test]
    async fn test_upload_produces_handle() {
        let dir = tempdir().unwrap();
        let destination = local_destination(dir.path(), None).await;

        let handle = destination
            .upload(&RequestContext::new(), "a.txt", Some(5), &b"hello"[..])
            .await
            .unwrap();

        assert_eq!(handle.size, 5);
        assert_eq!(
            handle.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        let path = handle.local_path.clone().unwrap();
        assert_eq!(handle.locator(), Some(path.to_string_lossy().into_owned()));
    }

    #[tokio::test]
    async fn test_upload_size_mismatch() {
        let dir = tempdir().unwrap();
        let destination = local_destination(dir.path(), None).await;

        let err = destination
            .upload(&RequestContext::new(), "a.txt", Some(3), &b"hello"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeMismatch {
                expected: 3,
                actual: 5
            }
        ));
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let dir = tempdir().unwrap();
        let destination = local_destination(dir.path(), Some(2)).await;

        let err = destination
            .upload(&RequestContext::new(), "a.txt", None, &b"hello"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EntityTooLarge { max_size: 2 }));
    }

    #[tokio::test]
    async fn test_upload_on_cancelled_context() {
        let dir = tempdir().unwrap();
        let destination = local_destination(dir.path(), None).await;
        let ctx = RequestContext::new();
        ctx.cancel();

        let err = destination
            .upload(&ctx, "a.txt", None, &b"hello"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    /// Backend whose writes never finish.
    struct StalledStorage;

    #[async_trait]
    impl Storage for StalledStorage {
        async fn upload_stream(
            &self,
            _ctx: &RequestContext,
            _name: &str,
            _reader: &mut (dyn AsyncRead + Send + Unpin),
        ) -> StorageResult<StoredObject> {
            std::future::pending().await
        }

        async fn delete(&self, _object: &StoredObject) -> StorageResult<()> {
            Ok(())
        }

        fn backend_type(&self) -> StorageBackend {
            StorageBackend::Local
        }
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_stalled_write() {
        let destination = Destination::new(Arc::new(StalledStorage), DestinationOptions::default());
        let ctx = RequestContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            destination.upload(&ctx, "a.txt", None, &b"hello"[..]),
        )
        .await
        .expect("cancellation should unblock the upload")
        .unwrap_err();
        assert!(matches!(err, StorageError::Cancelled));
    }

    #[test]
    fn test_finalize_fields() {
        let handle = FileHandle {
            name: "metadata.gz".to_string(),
            local_path: Some(PathBuf::from("/tmp/abc-metadata.gz")),
            remote_url: None,
            remote_id: None,
            size: 42,
            sha256: "aa".to_string(),
            sha512: "bb".to_string(),
            upload_duration: Duration::from_millis(1500),
        };
        let signer = FieldSigner::new(SECRET);

        let fields = handle.finalize_fields("metadata", &signer).unwrap();
        assert_eq!(fields["metadata.name"], "metadata.gz");
        assert_eq!(fields["metadata.path"], "/tmp/abc-metadata.gz");
        assert_eq!(fields["metadata.size"], "42");
        assert_eq!(fields["metadata.sha256"], "aa");
        assert_eq!(fields["metadata.upload_duration"], "1.500000");
        assert!(!fields.contains_key("metadata.remote_url"));

        let claims = signer.verify(&fields["metadata.sluice-upload"]).unwrap();
        assert_eq!(claims.fields["path"], "/tmp/abc-metadata.gz");
        assert_eq!(claims.fields["size"], "42");
    }
}
