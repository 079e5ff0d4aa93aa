//! Re-encodes a newline-delimited JSON index as it streams.
//!
//! Each line is parsed and written back compacted into a gzip stream. The
//! parser runs in its own task and hands compressed chunks to the consumer
//! through a bounded channel, so storage writes and parsing proceed on the
//! same bytes at the same time and the input is never held in full. A
//! single line may not exceed [`MAX_LINE_BYTES`].

use std::io::{self, Write};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::channel::mpsc;
use futures::SinkExt;
use sluice_core::RequestContext;
use sluice_storage::BoxedReader;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_util::io::StreamReader;

const CHANNEL_CAPACITY: usize = 8;

/// Longest index line accepted, newline excluded.
pub const MAX_LINE_BYTES: u64 = 1024 * 1024;

type ChunkSender = mpsc::Sender<io::Result<Bytes>>;

pub struct IndexTransform;

impl IndexTransform {
    /// Start transforming `reader` and return the re-encoded stream.
    ///
    /// A malformed line surfaces as an `InvalidData` read error on the
    /// returned stream. Cancelling `ctx` stops the parser.
    pub fn spawn(ctx: &RequestContext, reader: BoxedReader) -> BoxedReader {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_CAPACITY);
        let cancelled = ctx.cancelled_owned();
        let request_id = ctx.request_id();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled => {
                    tracing::debug!(request_id = %request_id, "Index transform cancelled");
                }
                _ = pump(reader, tx) => {}
            }
        });

        Box::pin(StreamReader::new(rx))
    }
}

async fn pump(reader: BoxedReader, mut tx: ChunkSender) {
    if let Err(e) = encode(reader, &mut tx).await {
        // Consumer may already be gone; nothing left to tell.
        let _ = tx.send(Err(e)).await;
    }
}

async fn send_chunk(tx: &mut ChunkSender, chunk: Vec<u8>) -> io::Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    tx.send(Ok(Bytes::from(chunk)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "index consumer went away"))
}

async fn encode(reader: BoxedReader, tx: &mut ChunkSender) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut line = Vec::new();
    let mut line_number = 0usize;

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            break;
        }
        line_number += 1;

        if read as u64 > MAX_LINE_BYTES && line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "index line {}: longer than {} bytes",
                    line_number, MAX_LINE_BYTES
                ),
            ));
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let value: serde_json::Value = serde_json::from_slice(&line).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("index line {}: {}", line_number, e),
            )
        })?;
        serde_json::to_writer(&mut encoder, &value)?;
        encoder.write_all(b"\n")?;

        let chunk = std::mem::take(encoder.get_mut());
        send_chunk(tx, chunk).await?;
    }

    let rest = encoder.finish()?;
    send_chunk(tx, rest).await
}
