//! Content transforms applied to file parts before they are persisted.

pub mod index;

pub use index::IndexTransform;
