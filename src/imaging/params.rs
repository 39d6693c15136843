//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. The
//! [`materialize`](crate::materialize) stage decides which pictures need
//! work and fills these in; the [`backend`](super::backend) does the pixel
//! work. A mock backend can then stand in during tests without changing the
//! decision logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`Rotation`]: Quarter-turn rotation derived from an EXIF orientation tag.
//! - [`TranscodeParams`]: Re-encode a picture as JPEG: source, output path, quality.
//! - [`RotateParams`]: Rotate a picture upright: source, output path, rotation, quality.

use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Rotation that brings a picture upright.
///
/// Only the three pure rotations of the EXIF orientation tag are handled.
/// Mirrored orientations (2, 4, 5, 7) are left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Orientation 6: rotate 90° clockwise.
    Clockwise90,
    /// Orientation 3: rotate 180°.
    Half,
    /// Orientation 8: rotate 90° counter-clockwise.
    CounterClockwise90,
}

impl Rotation {
    pub fn from_orientation(tag: u16) -> Option<Self> {
        match tag {
            3 => Some(Rotation::Half),
            6 => Some(Rotation::Clockwise90),
            8 => Some(Rotation::CounterClockwise90),
            _ => None,
        }
    }

    /// Clockwise rotation in degrees.
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Clockwise90 => 90,
            Rotation::Half => 180,
            Rotation::CounterClockwise90 => 270,
        }
    }
}

/// Parameters for re-encoding a picture as JPEG.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub quality: Quality,
}

/// Parameters for rotating a picture.
///
/// The output keeps the source's format when it can be encoded; otherwise it
/// is written as JPEG at `quality`.
#[derive(Debug, Clone, PartialEq)]
pub struct RotateParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub rotation: Rotation,
    pub quality: Quality,
}
