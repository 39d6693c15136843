//! Pure Rust image processing backend, with optional HEIF decoding.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Decode (HEIF/HEIC) | `libheif-rs`, behind the `heif` cargo feature |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Rotate | `DynamicImage::rotate90` / `rotate180` / `rotate270` |
//! | EXIF orientation | custom `exif_parser` (JPEG APP1 + TIFF IFD0) |
//!
//! Without the `heif` feature a HEIF source is reported as
//! [`BackendError::Unsupported`]; callers fall back to the original bytes.

use super::backend::{BackendError, ImageBackend};
use super::params::{Quality, RotateParams, Rotation, TranscodeParams};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// ISO-BMFF brands used by HEIF/HEIC files.
const HEIF_BRANDS: &[&[u8; 4]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

/// Image crate backend.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `data` starts with an ISO-BMFF `ftyp` box naming a HEIF brand.
fn is_heif(data: &[u8]) -> bool {
    data.get(4..8) == Some(b"ftyp".as_slice())
        && data
            .get(8..12)
            .is_some_and(|brand| HEIF_BRANDS.iter().any(|b| b.as_slice() == brand))
}

/// Load and decode an image from disk, sniffing the format from its content.
fn load_image(path: &Path) -> Result<(DynamicImage, Option<ImageFormat>), BackendError> {
    let data = std::fs::read(path)?;
    if is_heif(&data) {
        return decode_heif(&data).map(|img| (img, None));
    }
    let reader = ImageReader::new(std::io::Cursor::new(&data))
        .with_guessed_format()
        .map_err(BackendError::Io)?;
    let format = reader.format();
    let img = reader.decode().map_err(|e| {
        BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
    })?;
    Ok((img, format))
}

#[cfg(feature = "heif")]
fn decode_heif(data: &[u8]) -> Result<DynamicImage, BackendError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let failed = |what: &str, e: libheif_rs::HeifError| {
        BackendError::ProcessingFailed(format!("HEIF {what} failed: {e}"))
    };

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(data).map_err(|e| failed("parse", e))?;
    let handle = ctx.primary_image_handle().map_err(|e| failed("handle", e))?;
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| failed("decode", e))?;

    let planes = decoded.planes();
    let plane = planes.interleaved.ok_or_else(|| {
        BackendError::ProcessingFailed("HEIF image has no interleaved RGB plane".into())
    })?;

    // Rows may be padded; copy only the visible pixels
    let row_bytes = plane.width as usize * 3;
    let mut rgb = Vec::with_capacity(row_bytes * plane.height as usize);
    for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
        rgb.extend_from_slice(&row[..row_bytes]);
    }

    image::RgbImage::from_raw(plane.width, plane.height, rgb)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| {
            BackendError::ProcessingFailed("Failed to create image from decoded HEIF data".into())
        })
}

#[cfg(not(feature = "heif"))]
fn decode_heif(_data: &[u8]) -> Result<DynamicImage, BackendError> {
    Err(BackendError::Unsupported(
        "HEIF decoding requires the `heif` feature".into(),
    ))
}

/// Encode and save as JPEG. Alpha is dropped, JPEG has none.
fn save_jpeg(img: &DynamicImage, path: &Path, quality: Quality) -> Result<(), BackendError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(writer, quality.value());
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))
}

/// Save in `format` when the build can encode it, JPEG otherwise.
fn save_as(
    img: &DynamicImage,
    path: &Path,
    format: Option<ImageFormat>,
    quality: Quality,
) -> Result<(), BackendError> {
    match format {
        Some(format) if format != ImageFormat::Jpeg && format.writing_enabled() => img
            .save_with_format(path, format)
            .map_err(|e| BackendError::ProcessingFailed(format!("{format:?} encode failed: {e}"))),
        _ => save_jpeg(img, path, quality),
    }
}

fn apply_rotation(img: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Clockwise90 => img.rotate90(),
        Rotation::Half => img.rotate180(),
        Rotation::CounterClockwise90 => img.rotate270(),
    }
}

impl ImageBackend for RustBackend {
    fn transcode_to_jpeg(&self, params: &TranscodeParams) -> Result<(), BackendError> {
        let (img, _) = load_image(&params.source)?;
        save_jpeg(&img, &params.output, params.quality)
    }

    fn read_orientation(&self, path: &Path) -> Result<Option<u16>, BackendError> {
        Ok(super::exif_parser::read_orientation(path)?)
    }

    fn rotate(&self, params: &RotateParams) -> Result<(), BackendError> {
        let (img, format) = load_image(&params.source)?;
        let rotated = apply_rotation(img, params.rotation);
        save_as(&rotated, &params.output, format, params.quality)
    }
}
