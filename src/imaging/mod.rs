//! Image processing for picture normalization.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Re-encode → JPEG** | `image` JPEG encoder (HEIF input via `libheif-rs`) |
//! | **EXIF orientation** | custom parser (JPEG APP1 + TIFF IFD0) |
//! | **Rotate** | `image` quarter-turn rotations |
//!
//! The module is split into:
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **EXIF parser**: orientation lookup without a full decode

pub mod backend;
pub(crate) mod exif_parser;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use params::{Quality, RotateParams, Rotation, TranscodeParams};
pub use rust_backend::RustBackend;
