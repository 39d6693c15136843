//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three operations picture
//! normalization needs: re-encode as JPEG, read the EXIF orientation, and
//! rotate by quarter turns. Every operation works on files: it reads a source
//! path and writes an output path, so callers can hash the exact bytes that
//! end up in the archive.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate with optional HEIF decoding.

use super::params::{RotateParams, TranscodeParams};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// Trait for image processing backends.
pub trait ImageBackend {
    /// Decode `source` (any supported format, HEIF included when enabled) and
    /// write it to `output` as a baseline JPEG.
    fn transcode_to_jpeg(&self, params: &TranscodeParams) -> Result<(), BackendError>;

    /// Read the EXIF orientation tag. `Ok(None)` when the file has no EXIF
    /// data or no orientation entry.
    fn read_orientation(&self, path: &Path) -> Result<Option<u16>, BackendError>;

    /// Rotate `source` and write the result to `output`.
    fn rotate(&self, params: &RotateParams) -> Result<(), BackendError>;
}
