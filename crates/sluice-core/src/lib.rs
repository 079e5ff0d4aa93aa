//! Sluice Core Library
//!
//! Configuration, request-scoped cancellation, the unified error type and
//! field signing shared by the storage, processing and API crates.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod signing;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use context::RequestContext;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use signing::{FieldSigner, SignedFields, SigningError};
pub use storage_types::StorageBackend;
