use crate::traits::{sanitize_name, Storage, StorageError, StorageResult, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use sluice_core::RequestContext;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

// 5MB per part (minimum is 5MB except last part)
const PART_SIZE: usize = 5 * 1024 * 1024;

// Presigned GET URLs outlive the longest request they are handed out for.
const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// S3 storage implementation
///
/// Stored objects are described by a presigned GET URL, so readers that
/// hold no bucket credentials (the zip-metadata program, the upstream) can
/// fetch them.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(region));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .load()
            .await;

        let client = if let Some(ref endpoint) = endpoint_url {
            let mut s3_config_builder = aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .endpoint_url(endpoint)
                .region(config.region().cloned())
                .retry_config(retry_config);
            if let Some(provider) = config.credentials_provider().into_iter().next() {
                s3_config_builder = s3_config_builder.credentials_provider(provider);
            }
            // Path-style addressing is required for MinIO and friends
            s3_config_builder = s3_config_builder.force_path_style(true);

            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&config)
        };

        Ok(Self::from_client(client, bucket))
    }

    pub fn from_client(client: Client, bucket: String) -> Self {
        S3Storage { client, bucket }
    }

    fn generate_key(name: &str) -> StorageResult<String> {
        Ok(format!("uploads/{}/{}", Uuid::new_v4(), sanitize_name(name)?))
    }

    async fn presigned_url(&self, key: &str) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(PRESIGNED_URL_EXPIRY)
            .build()
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn delete_key(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    /// Delete the object once the request ends.
    fn reclaim_on_cancel(&self, ctx: &RequestContext, key: String) {
        let storage = self.clone();
        let cancelled = ctx.cancelled_owned();
        tokio::spawn(async move {
            cancelled.await;
            let _ = storage.delete_key(&key).await;
        });
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                "Failed to abort multipart upload"
            );
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<(Vec<CompletedPart>, u64)> {
        let mut part_number = 1i32;
        let mut parts = Vec::new();
        let mut total_size = 0u64;
        let mut pending = Some(first_part);

        loop {
            let part_data = match pending.take() {
                Some(data) => data,
                None => read_part(reader).await?,
            };
            if part_data.is_empty() {
                break;
            }

            let last = part_data.len() < PART_SIZE;
            total_size += part_data.len() as u64;

            let upload_part_result = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(Bytes::from(part_data)))
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %self.bucket,
                        key = %key,
                        part_number = part_number,
                        "Failed to upload part"
                    );
                    StorageError::UploadFailed(e.to_string())
                })?;

            let etag = upload_part_result
                .e_tag()
                .ok_or_else(|| {
                    StorageError::UploadFailed(format!("No ETag returned for part {}", part_number))
                })?
                .to_string();

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
            part_number += 1;

            if last {
                break;
            }
        }

        Ok((parts, total_size))
    }
}

/// Fill up to one part from the reader. A short result means EOF.
async fn read_part(reader: &mut (dyn AsyncRead + Send + Unpin)) -> StorageResult<Vec<u8>> {
    let mut buffer = vec![0u8; PART_SIZE];
    let mut filled = 0usize;
    while filled < PART_SIZE {
        let bytes_read = reader.read(&mut buffer[filled..]).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        if bytes_read == 0 {
            break;
        }
        filled += bytes_read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[async_trait]
impl Storage for S3Storage {
    async fn upload_stream(
        &self,
        ctx: &RequestContext,
        name: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<StoredObject> {
        let key = Self::generate_key(name)?;
        let start = std::time::Instant::now();

        let first_part = read_part(reader).await?;

        if first_part.len() < PART_SIZE {
            // Whole object fits in one part
            let size = first_part.len();
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(Bytes::from(first_part)))
                .content_type("application/octet-stream")
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %self.bucket,
                        key = %key,
                        size_bytes = size,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "S3 stream upload failed"
                    );
                    StorageError::UploadFailed(e.to_string())
                })?;

            self.reclaim_on_cancel(ctx, key.clone());

            tracing::info!(
                request_id = %ctx.request_id(),
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 stream upload successful"
            );

            let url = self.presigned_url(&key).await?;
            return Ok(StoredObject::remote(url, key));
        }

        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    "Failed to create multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        let upload_id = create_result
            .upload_id()
            .ok_or_else(|| StorageError::UploadFailed("No upload ID returned from S3".to_string()))?
            .to_string();

        let (parts, total_size) = match self
            .upload_parts(&key, &upload_id, first_part, reader)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.abort_multipart(&key, &upload_id).await;
                return Err(e);
            }
        };
        let part_count = parts.len();

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        if let Err(e) = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
        {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                "Failed to complete multipart upload"
            );
            self.abort_multipart(&key, &upload_id).await;
            return Err(StorageError::UploadFailed(e.to_string()));
        }

        self.reclaim_on_cancel(ctx, key.clone());

        tracing::info!(
            request_id = %ctx.request_id(),
            bucket = %self.bucket,
            key = %key,
            size_bytes = total_size,
            parts = part_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart stream upload successful"
        );

        let url = self.presigned_url(&key).await?;
        Ok(StoredObject::remote(url, key))
    }

    async fn delete(&self, object: &StoredObject) -> StorageResult<()> {
        match object.remote_id.as_deref() {
            Some(key) => self.delete_key(key).await,
            None => Ok(()),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
