//! Build-artifact uploads: one `file` part, optionally analysed by the
//! zip-metadata program, whose output is stored next to it and described to
//! the upstream under the `metadata` field group.

use std::sync::Arc;

use async_trait::async_trait;
use sluice_core::constants::{
    ARTIFACT_FORMAT_DEFAULT, ARTIFACT_FORMAT_ZIP, FILE_FIELD, METADATA_FIELD, METADATA_FILENAME,
};
use sluice_core::{FieldSigner, RequestContext};
use sluice_storage::{BoxedReader, Destination, FileHandle};

use super::traits::UploadProcessor;
use super::tracker::SavedFileTracker;
use super::writer::MultipartWriter;
use crate::archive::{ZipMetadataRunner, ZipOutcome};
use crate::error::ProcessingError;
use crate::transform::IndexTransform;

/// Declared artifact format from the `artifact_format` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFormat {
    Default,
    Zip,
    /// Any other value. Metadata extraction is skipped.
    Other(String),
}

impl ArtifactFormat {
    pub fn parse(value: &str) -> Self {
        if value == ARTIFACT_FORMAT_DEFAULT {
            ArtifactFormat::Default
        } else if value.eq_ignore_ascii_case(ARTIFACT_FORMAT_ZIP) {
            ArtifactFormat::Zip
        } else {
            ArtifactFormat::Other(value.to_string())
        }
    }

    pub fn wants_metadata(&self) -> bool {
        matches!(self, ArtifactFormat::Default | ArtifactFormat::Zip)
    }
}

pub struct ArtifactsUploadProcessor {
    format: ArtifactFormat,
    process_index: bool,
    metadata_destination: Destination,
    runner: Arc<ZipMetadataRunner>,
    signer: FieldSigner,
    tracker: SavedFileTracker,
}

impl ArtifactsUploadProcessor {
    /// `metadata_destination` receives the derived metadata stream.
    pub fn new(
        format: ArtifactFormat,
        metadata_destination: Destination,
        runner: Arc<ZipMetadataRunner>,
        signer: FieldSigner,
    ) -> Self {
        Self {
            format,
            process_index: false,
            metadata_destination,
            runner,
            signer,
            tracker: SavedFileTracker::new(),
        }
    }

    /// Route file contents through [`IndexTransform`] before storage.
    ///
    /// The stored file is then gzip-compressed NDJSON, never a zip archive,
    /// so metadata extraction is skipped whatever the declared format.
    pub fn with_index_processing(mut self, enabled: bool) -> Self {
        self.process_index = enabled;
        self
    }

    pub fn tracker(&self) -> &SavedFileTracker {
        &self.tracker
    }

    /// `None` when the upload turned out not to be a zip archive.
    async fn generate_metadata(
        &self,
        ctx: &RequestContext,
        file: &FileHandle,
    ) -> Result<Option<FileHandle>, ProcessingError> {
        let locator = file.locator().ok_or(ProcessingError::MissingLocator)?;
        let destination = &self.metadata_destination;

        let run = self
            .runner
            .run(ctx, &locator, |stdout| async move {
                destination
                    .upload(ctx, METADATA_FILENAME, None, stdout)
                    .await
                    .map_err(ProcessingError::from)
            })
            .await?;

        match run.outcome {
            ZipOutcome::Success => Ok(Some(run.output)),
            ZipOutcome::NotArchive => Ok(None),
            ZipOutcome::LimitsExceeded => Err(ProcessingError::BadMetadata),
            outcome @ ZipOutcome::Other(_) => Err(ProcessingError::Subprocess {
                command: self.runner.command().to_string(),
                outcome,
            }),
        }
    }
}

#[async_trait]
impl UploadProcessor for ArtifactsUploadProcessor {
    fn name(&self) -> &'static str {
        "artifacts"
    }

    fn reserved_groups(&self) -> &'static [&'static str] {
        &[METADATA_FIELD]
    }

    async fn process_file(
        &mut self,
        ctx: &RequestContext,
        field_name: &str,
        file: &FileHandle,
        writer: &mut MultipartWriter,
    ) -> Result<(), ProcessingError> {
        if field_name != FILE_FIELD {
            return Err(ProcessingError::InvalidField(field_name.to_string()));
        }

        if self.tracker.count() > 0 {
            return Err(ProcessingError::MultipleFiles);
        }

        self.tracker
            .track(field_name, file.locator().unwrap_or_default());

        if ctx.is_cancelled() {
            return Err(ProcessingError::ContextEnded);
        }

        if !self.format.wants_metadata() {
            tracing::debug!(
                request_id = %ctx.request_id(),
                format = ?self.format,
                "Skipping metadata extraction for artifact format"
            );
            return Ok(());
        }

        if self.process_index {
            tracing::debug!(
                request_id = %ctx.request_id(),
                "Skipping metadata extraction for re-encoded index"
            );
            return Ok(());
        }

        let Some(metadata) = self.generate_metadata(ctx, file).await? else {
            tracing::debug!(
                request_id = %ctx.request_id(),
                "Upload is not a zip archive, continuing without metadata"
            );
            return Ok(());
        };

        for (key, value) in metadata.finalize_fields(METADATA_FIELD, &self.signer)? {
            writer.write_field(&key, &value);
        }
        self.tracker
            .track(METADATA_FIELD, metadata.locator().unwrap_or_default());

        Ok(())
    }

    fn transform_contents(
        &self,
        ctx: &RequestContext,
        filename: &str,
        reader: BoxedReader,
    ) -> Result<BoxedReader, ProcessingError> {
        if !self.process_index {
            return Ok(reader);
        }

        tracing::debug!(
            request_id = %ctx.request_id(),
            filename = %filename,
            "Routing upload through index transform"
        );
        Ok(IndexTransform::spawn(ctx, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selector() {
        assert_eq!(ArtifactFormat::parse(""), ArtifactFormat::Default);
        assert_eq!(ArtifactFormat::parse("zip"), ArtifactFormat::Zip);
        assert_eq!(ArtifactFormat::parse("ZiP"), ArtifactFormat::Zip);
        assert_eq!(
            ArtifactFormat::parse("gzip"),
            ArtifactFormat::Other("gzip".to_string())
        );

        assert!(ArtifactFormat::parse("").wants_metadata());
        assert!(ArtifactFormat::parse("ZIP").wants_metadata());
        assert!(!ArtifactFormat::parse("raw").wants_metadata());
    }
}
