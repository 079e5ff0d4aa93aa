//! Sluice Storage Library
//!
//! The storage sink uploads are streamed into. A [`Storage`] backend
//! persists bytes locally or remotely; a [`Destination`] wraps a backend with
//! hashing, size limits and cancellation, and hands back a [`FileHandle`]
//! describing where the bytes landed.
//!
//! Everything persisted for a request is reclaimed once that request's
//! context is cancelled, which happens when the request ends.

pub mod destination;
pub mod factory;
pub mod hashing;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use destination::{Destination, DestinationOptions, FileHandle};
pub use factory::create_storage;
pub use hashing::{HashSummary, HashingReader};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use sluice_core::StorageBackend;
pub use traits::{BoxedReader, Storage, StorageError, StorageResult, StoredObject};
