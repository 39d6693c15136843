//! Minimal EXIF orientation reader for JPEG and TIFF files.
//!
//! Extracts a single field: the Orientation tag (0x0112) of IFD0.
//!
//! For JPEG: reads the TIFF block inside the APP1 marker (`"Exif\0\0"` header).
//! For TIFF: the file itself is the TIFF block.
//!
//! Pictures inside project archives have opaque names without extensions,
//! so the container is recognized by its magic bytes.

use std::path::Path;

const ORIENTATION_TAG: u16 = 0x0112;
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Read the EXIF orientation of a file.
///
/// `Ok(None)` means the file has no EXIF block or no orientation tag.
pub fn read_orientation(path: &Path) -> std::io::Result<Option<u16>> {
    let bytes = std::fs::read(path)?;
    Ok(orientation_from_bytes(&bytes))
}

/// Read the EXIF orientation from in-memory image bytes.
pub fn orientation_from_bytes(data: &[u8]) -> Option<u16> {
    if data.starts_with(&[0xFF, 0xD8]) {
        orientation_from_tiff(find_jpeg_app1_exif(data)?)
    } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        orientation_from_tiff(data)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// JPEG: locate the EXIF block in APP1
// ---------------------------------------------------------------------------

/// Find the TIFF block inside a JPEG's EXIF APP1 segment.
fn find_jpeg_app1_exif(data: &[u8]) -> Option<&[u8]> {
    // Skip SOI
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        // Fill bytes before a marker
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // SOS (image data) or EOI: no metadata past this point
        if marker == 0xDA || marker == 0xD9 {
            return None;
        }
        // Markers without length field
        if (0xD0..=0xD7).contains(&marker) || marker == 0x01 {
            pos += 2;
            continue;
        }

        let seg_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if seg_len < 2 {
            return None;
        }
        let seg_start = pos + 4;
        let seg_end = (pos + 2 + seg_len).min(data.len());

        if marker == 0xE1 {
            let segment = &data[seg_start..seg_end];
            if let Some(tiff) = segment.strip_prefix(EXIF_HEADER) {
                return Some(tiff);
            }
        }
        pos += 2 + seg_len;
    }
    None
}

// ---------------------------------------------------------------------------
// TIFF: read IFD0
// ---------------------------------------------------------------------------

/// Read the orientation tag from a TIFF block (IFD0 only).
fn orientation_from_tiff(data: &[u8]) -> Option<u16> {
    let big_endian = match data.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };

    let read_u16 = |offset: usize| -> Option<u16> {
        let bytes: [u8; 2] = data.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
        Some(if big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    };

    let read_u32 = |offset: usize| -> Option<u32> {
        let bytes: [u8; 4] = data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
        Some(if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    };

    // Verify TIFF magic (42)
    if read_u16(2)? != 42 {
        return None;
    }

    let ifd_offset = read_u32(4)? as usize;
    let entry_count = read_u16(ifd_offset)? as usize;
    let entries_start = ifd_offset.checked_add(2)?;

    for i in 0..entry_count {
        let entry_offset = entries_start.checked_add(i.checked_mul(12)?)?;
        let tag = read_u16(entry_offset)?;
        if tag != ORIENTATION_TAG {
            continue;
        }
        // SHORT, count 1: the value sits in the first two bytes of the value field
        let typ = read_u16(entry_offset.checked_add(2)?)?;
        let count = read_u32(entry_offset.checked_add(4)?)?;
        if typ != 3 || count != 1 {
            return None;
        }
        return read_u16(entry_offset.checked_add(8)?);
    }

    None
}
