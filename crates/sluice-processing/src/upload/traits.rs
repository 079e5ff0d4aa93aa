//! Traits for the upload pipeline.

use async_trait::async_trait;
use sluice_core::RequestContext;
use sluice_storage::{BoxedReader, FileHandle};

use super::writer::MultipartWriter;
use crate::error::ProcessingError;

/// Per-request processor the interception engine calls into for every
/// file part. The engine depends only on this trait.
#[async_trait]
pub trait UploadProcessor: Send + Sync {
    /// Stable identifier for logs and metrics.
    fn name(&self) -> &'static str;

    /// Called once per file part after it has been persisted. May write
    /// extra fields into the outgoing body.
    async fn process_file(
        &mut self,
        ctx: &RequestContext,
        field_name: &str,
        file: &FileHandle,
        writer: &mut MultipartWriter,
    ) -> Result<(), ProcessingError>;

    /// Field groups this processor writes on its own account, such as
    /// `metadata` for `metadata.path`. Client value parts named after a
    /// group, or inside one, are refused wherever they appear in the body.
    fn reserved_groups(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called once per file part before it is persisted. Returns either the
    /// original stream or a replacement for it.
    fn transform_contents(
        &self,
        _ctx: &RequestContext,
        _filename: &str,
        reader: BoxedReader,
    ) -> Result<BoxedReader, ProcessingError> {
        Ok(reader)
    }
}
