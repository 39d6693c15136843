//! Output archive packaging.
//!
//! Stage 4 of the merge pipeline. Writes the merged project as
//! `<output_dir>/<name>.prj`, a zip container in the editor's project format:
//!
//! | Entry | Content | Compression |
//! |---|---|---|
//! | `mimetype` | `application/pgx-project+zip` | stored |
//! | `META-INF\file-version` | `1.0.0.0` | deflated |
//! | `META-INF\metadata.json` | metadata, 4-space indented | deflated |
//! | `PROJECT\IMAGES\<id>` | picture bytes, comment = original name | stored |
//! | `PROJECT\projectDescriptor.json` | project document, compact | deflated |
//!
//! Text entries are UTF-8 with a leading byte-order mark. Entry names use `\`,
//! as the desktop editor writes them.
//!
//! Two strategies implement [`Packager`]:
//!
//! - [`ArchivePackager`] materializes pictures (HEIC → JPEG, orientation fix,
//!   SHA-1 ids, dedup) and streams everything straight into the archive.
//! - [`DirectoryPackager`] is the older layout: it stages a directory tree,
//!   names pictures by the MD5 of their source file, and zips the tree with
//!   `/` separators. No picture normalization happens on this path.
//!
//! Both write to a temporary file next to the destination and rename it into
//! place once complete, so a failed run never leaves a half-written archive.

use crate::config::PackagingStrategy;
use crate::imaging::ImageBackend;
use crate::loader::SourceSet;
use crate::materialize::{
    MaterializeError, MaterializeOptions, MaterializeStats, MaterializedImage, materialize,
    resolve_picture,
};
use crate::project::{
    Permissions, ProjectDocument, encode_document, encode_document_pretty, encode_text,
};
use log::{debug, info};
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::{FullFileOptions, SimpleFileOptions};
use zip::{CompressionMethod, ZipWriter};

/// Content of the `mimetype` entry.
pub const MIMETYPE: &str = "application/pgx-project+zip";
/// Content of the `META-INF\file-version` entry.
pub const FILE_VERSION: &str = "1.0.0.0";
/// File extension of project archives.
pub const PROJECT_EXTENSION: &str = "prj";

const MIMETYPE_ENTRY: &str = "mimetype";
const FILE_VERSION_ENTRY: &str = "META-INF\\file-version";
const METADATA_ENTRY: &str = "META-INF\\metadata.json";
const IMAGES_PREFIX: &str = "PROJECT\\IMAGES\\";
const DESCRIPTOR_ENTRY: &str = "PROJECT\\projectDescriptor.json";

#[derive(Error, Debug)]
pub enum PackError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("project name {0:?} cannot be used as a file name")]
    InvalidName(String),
}

/// Summary of one packaging run.
#[derive(Debug, Clone, PartialEq)]
pub struct PackReport {
    /// The archive that was written.
    pub archive: PathBuf,
    pub strategy: PackagingStrategy,
    /// Picture references in the document.
    pub pictures: usize,
    /// Image entries written to the archive.
    pub images_written: usize,
    /// References that reused an already written image.
    pub images_deduplicated: usize,
    /// TEXT elements whose permissions were opened up.
    pub text_permissions_cleared: usize,
    /// Normalization counters (archive strategy only).
    pub materialize: Option<MaterializeStats>,
}

/// Writes a planned project document as a `.prj` archive.
pub trait Packager {
    fn strategy(&self) -> PackagingStrategy;

    /// Package `document` with `metadata`, reading pictures from `sources`.
    fn pack(
        &self,
        document: &ProjectDocument,
        metadata: &Value,
        sources: &SourceSet,
    ) -> Result<PackReport, PackError>;
}

/// `<output_dir>/<name>.prj`
pub fn output_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{name}.{PROJECT_EXTENSION}"))
}

fn check_name(name: &str) -> Result<(), PackError> {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(PackError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Run `write` against a temporary file in `output_dir`, then move it to
/// `<output_dir>/<name>.prj`, replacing any previous archive.
fn write_atomically(
    output_dir: &Path,
    name: &str,
    write: impl FnOnce(&File) -> Result<(), PackError>,
) -> Result<PathBuf, PackError> {
    check_name(name)?;
    fs::create_dir_all(output_dir)?;
    let target = output_path(output_dir, name);
    let temp = NamedTempFile::new_in(output_dir)?;
    write(temp.as_file())?;
    temp.persist(&target).map_err(|e| PackError::Io(e.error))?;
    Ok(target)
}

/// Zip timestamp for a millisecond Unix time, read as UTC.
///
/// Falls back to the zip epoch (1980-01-01) when the time is missing or
/// outside the range a zip entry can hold.
pub fn zip_timestamp(millis: Option<i64>) -> zip::DateTime {
    millis
        .and_then(chrono::DateTime::from_timestamp_millis)
        .and_then(|utc| zip::DateTime::try_from(utc.naive_utc()).ok())
        .unwrap_or_default()
}

/// Open up every TEXT element on the month pages (every slot except the
/// cover) by setting `permissions.explicitPermissions` to `{}`.
///
/// Returns the number of elements touched.
pub fn clear_text_permissions(document: &mut ProjectDocument) -> usize {
    let mut cleared = 0;
    for slot in document.pages.iter_mut().skip(1) {
        let Some(page) = slot.page_mut() else {
            continue;
        };
        for element in page.elements_mut().filter(|e| e.is_text()) {
            let open = Value::Object(Map::new());
            match &mut element.permissions {
                Some(Some(permissions)) => permissions.explicit_permissions = Some(Some(open)),
                other => {
                    *other = Some(Some(Permissions {
                        explicit_permissions: Some(Some(open)),
                        extra: Map::new(),
                    }))
                }
            }
            cleared += 1;
        }
    }
    cleared
}

// ============================================================================
// Archive strategy
// ============================================================================

/// Writes content-addressed, deduplicated pictures straight into the archive.
pub struct ArchivePackager<'a, B: ImageBackend> {
    backend: &'a B,
    options: MaterializeOptions,
    output_dir: PathBuf,
}

impl<'a, B: ImageBackend> ArchivePackager<'a, B> {
    pub fn new(backend: &'a B, options: MaterializeOptions, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            options,
            output_dir: output_dir.into(),
        }
    }
}

impl<B: ImageBackend> Packager for ArchivePackager<'_, B> {
    fn strategy(&self) -> PackagingStrategy {
        PackagingStrategy::Archive
    }

    fn pack(
        &self,
        document: &ProjectDocument,
        metadata: &Value,
        sources: &SourceSet,
    ) -> Result<PackReport, PackError> {
        let materialized = materialize(document, sources, self.backend, &self.options)?;
        let mut final_document = materialized.document;
        let text_permissions_cleared = clear_text_permissions(&mut final_document);
        let images = materialized.images;

        let name = final_document.descriptor.name.clone();
        let archive = write_atomically(&self.output_dir, &name, |file| {
            write_project_archive(file, metadata, &final_document, &images)
        })?;
        info!("Wrote {} ({} images)", archive.display(), images.len());

        let stats = materialized.stats;
        Ok(PackReport {
            archive,
            strategy: PackagingStrategy::Archive,
            pictures: stats.pictures,
            images_written: images.len(),
            images_deduplicated: stats.pictures - images.len(),
            text_permissions_cleared,
            materialize: Some(stats),
        })
    }
}

fn write_project_archive(
    file: &File,
    metadata: &Value,
    document: &ProjectDocument,
    images: &[MaterializedImage],
) -> Result<(), PackError> {
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(BufWriter::new(file));

    zip.start_file(MIMETYPE_ENTRY, stored)?;
    zip.write_all(&encode_text(MIMETYPE))?;

    zip.start_file(FILE_VERSION_ENTRY, deflated)?;
    zip.write_all(&encode_text(FILE_VERSION))?;

    zip.start_file(METADATA_ENTRY, deflated)?;
    zip.write_all(&encode_document_pretty(metadata)?)?;

    for image in images {
        let options = FullFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(zip_timestamp(image.modified))
            .with_file_comment(image.original_name.as_str());
        zip.start_file(format!("{IMAGES_PREFIX}{}", image.id), options)?;
        let mut source = File::open(&image.path)?;
        io::copy(&mut source, &mut zip)?;
        debug!("{} <- {}", image.id, image.original_name);
    }

    zip.start_file(DESCRIPTOR_ENTRY, deflated)?;
    zip.write_all(&encode_document(document)?)?;

    zip.finish()?.flush()?;
    Ok(())
}

// ============================================================================
// Directory strategy
// ============================================================================

/// Stages the project as a directory tree, then zips it.
///
/// Picture ids become the uppercase MD5 of the *source* file; files are
/// copied as they are.
pub struct DirectoryPackager {
    output_dir: PathBuf,
}

impl DirectoryPackager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// MD5 of a file's contents, uppercase hex.
pub fn md5_hash(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let digest = Md5::digest(&bytes);
    Ok(format!("{:X}", digest))
}

impl Packager for DirectoryPackager {
    fn strategy(&self) -> PackagingStrategy {
        PackagingStrategy::Directory
    }

    fn pack(
        &self,
        document: &ProjectDocument,
        metadata: &Value,
        sources: &SourceSet,
    ) -> Result<PackReport, PackError> {
        let staging = TempDir::new()?;
        let root = staging.path();
        let images_dir = root.join("PROJECT").join("IMAGES");
        fs::create_dir_all(root.join("META-INF"))?;
        fs::create_dir_all(&images_dir)?;

        fs::write(root.join("mimetype"), encode_text(MIMETYPE))?;
        fs::write(
            root.join("META-INF").join("file-version"),
            encode_text(FILE_VERSION),
        )?;
        fs::write(
            root.join("META-INF").join("metadata.json"),
            encode_document_pretty(metadata)?,
        )?;

        let mut document = document.clone();
        let mut pictures = 0;
        let mut images_written = 0;
        for (index, slot) in document.pages.iter_mut().enumerate() {
            let Some(page) = slot.page_mut() else {
                continue;
            };
            let project_key = page.source_project.clone();
            for element in page.elements_mut().filter(|e| e.is_picture()) {
                let Some(Some(picture)) = element.picture.as_mut() else {
                    continue;
                };
                pictures += 1;
                let original =
                    resolve_picture(sources, index, project_key.as_deref(), &picture.id)?;
                let id = md5_hash(&original)?;
                let target = images_dir.join(&id);
                if !target.exists() {
                    fs::copy(&original, &target)?;
                    images_written += 1;
                }
                picture.id = id;
            }
        }

        fs::write(
            root.join("PROJECT").join("projectDescriptor.json"),
            encode_document(&document)?,
        )?;

        let name = document.descriptor.name.clone();
        let archive = write_atomically(&self.output_dir, &name, |file| zip_directory(root, file))?;
        info!(
            "Wrote {} ({} images, directory layout)",
            archive.display(),
            images_written
        );

        Ok(PackReport {
            archive,
            strategy: PackagingStrategy::Directory,
            pictures,
            images_written,
            images_deduplicated: pictures - images_written,
            text_permissions_cleared: 0,
            materialize: None,
        })
    }
}

/// Zip every file and directory under `root`, sorted, `/`-separated, deflated.
fn zip_directory(root: &Path, file: &File) -> Result<(), PackError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(BufWriter::new(file));

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(name.as_str(), options)?;
        } else {
            zip.start_file(name.as_str(), options)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    zip.finish()?.flush()?;
    Ok(())
}
