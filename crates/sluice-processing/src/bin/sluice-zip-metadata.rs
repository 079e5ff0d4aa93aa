//! Writes zip artifact metadata to stdout.
//!
//! Usage: `sluice-zip-metadata <path-or-url>`
//!
//! The exit code is the result: 0 on success, 10 when the input is not a
//! zip archive, 12 when it cannot be found, 13 when it exceeds entry or size
//! limits and 14 for anything else. Diagnostics go to stderr.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::process::ExitCode;

use futures::StreamExt;
use sluice_processing::archive::{generate_metadata, MetadataError, MetadataLimits};
use sluice_processing::{FailureKind, ZipOutcome};
use tracing_subscriber::EnvFilter;

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

async fn download(url: &str) -> Result<File, MetadataError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| MetadataError::ArchiveNotFound(format!("{}: {}", url, e)))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(MetadataError::ArchiveNotFound(url.to_string()));
    }
    if !response.status().is_success() {
        return Err(MetadataError::Io(io::Error::other(format!(
            "unexpected status {} fetching archive",
            response.status()
        ))));
    }

    let mut file = tempfile::tempfile()?;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(io::Error::other)?;
        file.write_all(&chunk)?;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

async fn run(locator: &str) -> Result<usize, MetadataError> {
    let file = if is_remote(locator) {
        download(locator).await?
    } else {
        File::open(locator).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => MetadataError::ArchiveNotFound(locator.to_string()),
            _ => MetadataError::Io(e),
        })?
    };

    let stdout = io::stdout().lock();
    generate_metadata(
        BufReader::new(file),
        BufWriter::new(stdout),
        &MetadataLimits::default(),
    )
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [locator] = args.as_slice() else {
        tracing::error!("usage: sluice-zip-metadata <path-or-url>");
        return ExitCode::from(ZipOutcome::Other(FailureKind::Unknown).exit_code());
    };

    match run(locator).await {
        Ok(entries) => {
            tracing::info!(entries = entries, "Wrote archive metadata");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let outcome = e.outcome();
            tracing::error!(error = %e, outcome = outcome.label(), "Failed to generate metadata");
            ExitCode::from(outcome.exit_code())
        }
    }
}
