use std::collections::HashMap;

use async_trait::async_trait;
use sluice_core::constants::FILE_FIELD;
use sluice_core::RequestContext;
use sluice_storage::FileHandle;

use super::traits::UploadProcessor;
use super::writer::MultipartWriter;
use crate::error::ProcessingError;

/// Fields processed so far in one request, mapped to where they were saved.
///
/// Tracking is monotonic. The tracker belongs to a single request task, so
/// it needs no locking.
#[derive(Debug, Default)]
pub struct SavedFileTracker {
    tracked: HashMap<String, String>,
    primary: usize,
}

impl SavedFileTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, field_name: &str, path: impl Into<String>) {
        if field_name == FILE_FIELD {
            self.primary += 1;
        }
        self.tracked.insert(field_name.to_string(), path.into());
    }

    /// Number of primary `file` fields tracked.
    pub fn count(&self) -> usize {
        self.primary
    }

    /// Number of distinct fields tracked.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn get(&self, field_name: &str) -> Option<&str> {
        self.tracked.get(field_name).map(String::as_str)
    }

    pub fn tracked(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tracked.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Generic processor for plain accelerated uploads: record every file
/// field, reject repeats, add nothing.
#[async_trait]
impl UploadProcessor for SavedFileTracker {
    fn name(&self) -> &'static str {
        "accelerate"
    }

    async fn process_file(
        &mut self,
        _ctx: &RequestContext,
        field_name: &str,
        file: &FileHandle,
        _writer: &mut MultipartWriter,
    ) -> Result<(), ProcessingError> {
        if self.tracked.contains_key(field_name) {
            return Err(ProcessingError::DuplicateField(field_name.to_string()));
        }

        self.track(field_name, file.locator().unwrap_or_default());
        Ok(())
    }
}
