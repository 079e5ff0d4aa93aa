//! Upload processors and the pieces they share.

pub mod artifacts;
pub mod traits;
pub mod tracker;
pub mod writer;

pub use artifacts::{ArtifactFormat, ArtifactsUploadProcessor};
pub use traits::UploadProcessor;
pub use tracker::SavedFileTracker;
pub use writer::MultipartWriter;
