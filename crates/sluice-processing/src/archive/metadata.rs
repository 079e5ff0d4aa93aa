//! Deterministic metadata for zip archives.
//!
//! Output is a gzip stream of length-prefixed strings (big-endian `u32`
//! length, then the bytes): the header, a JSON object of archive-level
//! errors, then one path and one JSON entry description per archive entry
//! in path order. Directories implied by entry paths are listed too.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, Write};

use chrono::NaiveDate;
use flate2::{Compression, GzBuilder};
use serde::Serialize;
use zip::result::ZipError;
use zip::ZipArchive;

use super::outcome::{FailureKind, ZipOutcome};

pub const METADATA_HEADER: &str = "Sluice Artifacts Metadata 1.0\n";

#[derive(Debug, Clone, Copy)]
pub struct MetadataLimits {
    pub max_entries: usize,
    /// Cap on the sum of declared uncompressed entry sizes.
    pub max_total_size: u64,
}

impl Default for MetadataLimits {
    fn default() -> Self {
        Self {
            max_entries: 200_000,
            max_total_size: 64 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("not a zip archive: {0}")]
    NotZip(String),

    #[error("archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("archive limits exceeded: {0}")]
    LimitsReached(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(ZipError),
}

impl MetadataError {
    pub fn outcome(&self) -> ZipOutcome {
        match self {
            MetadataError::NotZip(_) => ZipOutcome::NotArchive,
            MetadataError::ArchiveNotFound(_) => ZipOutcome::Other(FailureKind::ArchiveNotFound),
            MetadataError::LimitsReached(_) => ZipOutcome::LimitsExceeded,
            MetadataError::Io(_) | MetadataError::Zip(_) => {
                ZipOutcome::Other(FailureKind::Unknown)
            }
        }
    }
}

impl From<ZipError> for MetadataError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::InvalidArchive(msg) | ZipError::UnsupportedArchive(msg) => {
                MetadataError::NotZip(msg.to_string())
            }
            ZipError::Io(e) => MetadataError::Io(e),
            other => MetadataError::Zip(other),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct EntryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    modified: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    zipped: Option<u64>,
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)
        .map(|t| t.and_utc().timestamp())
}

/// "a/b/c.txt" -> ["a/", "a/b/"]
fn parent_dirs(path: &str) -> impl Iterator<Item = String> + '_ {
    path.trim_end_matches('/')
        .match_indices('/')
        .map(move |(idx, _)| path[..=idx].to_string())
}

fn write_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "metadata string too long"))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(value.as_bytes())
}

/// Write metadata for `archive` to `out`. Returns the number of entries
/// written.
pub fn generate_metadata<R, W>(
    archive: R,
    out: W,
    limits: &MetadataLimits,
) -> Result<usize, MetadataError>
where
    R: Read + Seek,
    W: Write,
{
    let mut archive = ZipArchive::new(archive)?;

    if archive.len() > limits.max_entries {
        return Err(MetadataError::LimitsReached(format!(
            "{} entries exceeds the limit of {}",
            archive.len(),
            limits.max_entries
        )));
    }

    let mut entries: BTreeMap<String, EntryMetadata> = BTreeMap::new();
    let mut total_size = 0u64;

    for index in 0..archive.len() {
        let file = archive.by_index_raw(index)?;

        total_size = total_size
            .checked_add(file.size())
            .filter(|total| *total <= limits.max_total_size)
            .ok_or_else(|| {
                MetadataError::LimitsReached(format!(
                    "declared size exceeds the limit of {} bytes",
                    limits.max_total_size
                ))
            })?;

        let name = file.name().to_string();
        for dir in parent_dirs(&name) {
            entries.entry(dir).or_default();
        }
        entries.insert(
            name,
            EntryMetadata {
                modified: zip_time_to_unix(file.last_modified()),
                mode: file.unix_mode().map(|mode| format!("{:o}", mode & 0o7777)),
                crc: Some(file.crc32()),
                size: Some(file.size()),
                zipped: Some(file.compressed_size()),
            },
        );
    }

    // mtime 0 keeps output byte-identical across runs
    let mut gz = GzBuilder::new().mtime(0).write(out, Compression::default());
    write_string(&mut gz, METADATA_HEADER)?;
    write_string(&mut gz, "{}")?;
    for (path, meta) in &entries {
        write_string(&mut gz, path)?;
        let json = serde_json::to_string(meta).map_err(io::Error::from)?;
        write_string(&mut gz, &json)?;
    }
    let mut out = gz.finish()?;
    out.flush()?;

    Ok(entries.len())
}
