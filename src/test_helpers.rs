//! Shared test utilities for the photobook-merge test suite.
//!
//! Provides builders for source project archives, JSON page fixtures, a zip
//! reader for asserting on written archives, and tiny synthetic images.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! ArchiveBuilder::new()
//!     .metadata(json!({"owner": "me"}))
//!     .descriptor(sample_document("Family", vec![
//!         picture_page("cover", &[("IMG1", "beach.jpg")]),
//!         text_page("jan", "Happy new year"),
//!     ]))
//!     .image("IMG1", tiny_jpeg(4, 4, [255, 0, 0]))
//!     .write(&tmp.path().join("family.prj"));
//!
//! let entries = read_archive(&output);
//! assert_eq!(entries[0].name, "mimetype");
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{Value, json};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// =========================================================================
// Source archives
// =========================================================================

/// Builds a source project archive entry by entry, in call order.
#[derive(Default)]
pub struct ArchiveBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `META-INF/metadata.json`
    pub fn metadata(self, metadata: Value) -> Self {
        let bytes = serde_json::to_vec(&metadata).unwrap();
        self.entry("META-INF/metadata.json", bytes)
    }

    /// `PROJECT/projectDescriptor.json`
    pub fn descriptor(self, document: Value) -> Self {
        let bytes = serde_json::to_vec(&document).unwrap();
        self.entry("PROJECT/projectDescriptor.json", bytes)
    }

    /// `PROJECT/IMAGES/<id>`
    pub fn image(self, id: &str, bytes: Vec<u8>) -> Self {
        self.entry(&format!("PROJECT/IMAGES/{id}"), bytes)
    }

    /// Any entry, name used verbatim.
    pub fn entry(mut self, name: &str, bytes: Vec<u8>) -> Self {
        self.entries.push((name.to_string(), bytes));
        self
    }

    pub fn write(self, path: &Path) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in self.entries {
            zip.start_file(name, options).unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.finish().unwrap();
    }
}

// =========================================================================
// Document fixtures
// =========================================================================

/// A project descriptor document named `name` holding `pages`.
pub fn sample_document(name: &str, pages: Vec<Value>) -> Value {
    json!({
        "descriptor": {
            "id": format!("descriptor-{name}"),
            "name": name,
            "createdWith": "fixture",
            "revision": 7
        },
        "productId": 4217,
        "options": {"binding": "spiral", "paper": "matte"},
        "compositionMetaInfo": {"format": "A4-landscape", "pageCount": 13},
        "pages": pages
    })
}

/// A page with one PICTURE element per `(picture id, original name)`.
///
/// The page title is its id. Names ending in `.heic` get `image/heic`,
/// everything else `image/jpeg`. `exifDate` is null.
pub fn picture_page(id: &str, pictures: &[(&str, &str)]) -> Value {
    let elements: Vec<Value> = pictures
        .iter()
        .enumerate()
        .map(|(n, (picture_id, name))| {
            let mime = if crate::materialize::is_heic_name(name) {
                "image/heic"
            } else {
                "image/jpeg"
            };
            json!({
                "id": format!("{id}-el{n}"),
                "type": "PICTURE",
                "frame": {"x": 10, "y": 10, "width": 100, "height": 80},
                "picture": {
                    "id": picture_id,
                    "name": name,
                    "mimeType": mime,
                    "exifDate": null,
                    "lastModified": 1_600_000_000_000i64
                }
            })
        })
        .collect();
    json!({
        "id": id,
        "title": id,
        "layers": [{"name": "main", "elements": elements}]
    })
}

/// A page with a single TEXT element and no permissions block.
pub fn text_page(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "title": id,
        "layers": [{
            "name": "main",
            "elements": [{"id": format!("{id}-el0"), "type": "TEXT", "text": text}]
        }]
    })
}

// =========================================================================
// Written archives
// =========================================================================

/// One entry of a zip archive, fully read.
#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub comment: String,
    pub compression: CompressionMethod,
    pub modified: Option<zip::DateTime>,
}

/// Read every entry of the archive at `path`, in archive order.
pub fn read_archive(path: &Path) -> Vec<ArchiveEntry> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            ArchiveEntry {
                name: file.name().to_string(),
                comment: file.comment().to_string(),
                compression: file.compression(),
                modified: file.last_modified(),
                data,
            }
        })
        .collect()
}

// =========================================================================
// Synthetic images
// =========================================================================

/// A solid-colour JPEG.
pub fn tiny_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, 90);
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(encoder)
        .unwrap();
    out
}

/// A PNG with a horizontal gradient.
pub fn tiny_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        image::Rgb([(x * 255 / width.max(1)) as u8, 64, 128])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// A TIFF header with a one-entry IFD0 holding the Orientation tag.
///
/// Layout: byte order (0-1), magic (2-3), IFD offset 8 (4-7), entry count
/// (8-9), tag (10-11), type SHORT (12-13), count (14-17), value (18-21),
/// next IFD (22-25).
pub fn exif_tiff_block(orientation: u16, big_endian: bool) -> Vec<u8> {
    let u16b = |v: u16| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let u32b = |v: u32| {
        if big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    };

    let mut block = Vec::with_capacity(26);
    block.extend_from_slice(if big_endian { b"MM" } else { b"II" });
    block.extend_from_slice(&u16b(42));
    block.extend_from_slice(&u32b(8));
    block.extend_from_slice(&u16b(1));
    block.extend_from_slice(&u16b(0x0112));
    block.extend_from_slice(&u16b(3));
    block.extend_from_slice(&u32b(1));
    block.extend_from_slice(&u16b(orientation));
    block.extend_from_slice(&[0, 0]);
    block.extend_from_slice(&u32b(0));
    block
}

/// A decodable JPEG carrying an EXIF APP1 segment with `orientation`.
pub fn jpeg_with_orientation(orientation: u16) -> Vec<u8> {
    let base = tiny_jpeg(8, 4, [120, 120, 120]);
    let tiff = exif_tiff_block(orientation, false);

    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(&tiff);
    let length = (payload.len() + 2) as u16;

    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&base[2..]);
    out
}
