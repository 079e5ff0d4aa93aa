//! Checksumming reader used while streaming uploads into storage.

use sha2::{Digest, Sha256, Sha512};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Byte count and digests of everything read through a [`HashingReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashSummary {
    pub size: u64,
    pub sha256: String,
    pub sha512: String,
}

/// `AsyncRead` adapter that hashes and counts bytes as they pass, failing
/// the read once more than `max_size` bytes have been seen.
pub struct HashingReader<R> {
    inner: R,
    size: u64,
    max_size: Option<u64>,
    limit_exceeded: bool,
    sha256: Sha256,
    sha512: Sha512,
}

impl<R: AsyncRead + Unpin> HashingReader<R> {
    pub fn new(inner: R, max_size: Option<u64>) -> Self {
        Self {
            inner,
            size: 0,
            max_size,
            limit_exceeded: false,
            sha256: Sha256::new(),
            sha512: Sha512::new(),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.size
    }

    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    pub fn finish(self) -> HashSummary {
        HashSummary {
            size: self.size,
            sha256: hex::encode(self.sha256.finalize()),
            sha512: hex::encode(self.sha512.finalize()),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let chunk = &buf.filled()[before..];
        this.size += chunk.len() as u64;
        if let Some(max) = this.max_size {
            if this.size > max {
                this.limit_exceeded = true;
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("entity is too large: limit is {} bytes", max),
                )));
            }
        }

        this.sha256.update(chunk);
        this.sha512.update(chunk);
        Poll::Ready(Ok(()))
    }
}
