//! Picture materialization.
//!
//! Stage 3 of the merge pipeline. Walks the planned document (pages in slot
//! order, then layers, then elements) and turns every picture reference into
//! a content-addressed image ready for packaging:
//!
//! 1. **Resolve** the source file through the page's `sourceProject` tag.
//! 2. **Transcode** pictures named `*.heic` to JPEG. The editor cannot show
//!    HEIC, so on success the picture's `mimeType` becomes `image/jpeg`.
//! 3. **Orientation fix** for pictures imported from the desktop editor's
//!    filesystem source: their EXIF orientation is baked into the pixels.
//! 4. **Hash** the final bytes (SHA-1, uppercase hex). The hash becomes the
//!    new picture id.
//! 5. **Timestamp**: `lastModified` takes the value of `exifDate` when set.
//! 6. **Dedup**: the first picture with a given hash is listed for packaging;
//!    later ones only get their reference rewritten.
//!
//! Steps 2 and 3 are best effort. Each one reports a [`Normalized`] outcome;
//! a backend failure leaves the file as it was and is logged, never raised.
//!
//! Derived files are written next to the extracted source inside the
//! loader's working area:
//!
//! ```text
//! PROJECT/IMAGES/
//! ├── IMG_0042            # Original, never modified
//! ├── IMG_0042.jpg        # HEIC → JPEG
//! └── IMG_0042.jpg.upright  # Rotated
//! ```

use crate::config::Settings;
use crate::imaging::{
    BackendError, ImageBackend, Quality, RotateParams, Rotation, TranscodeParams,
};
use crate::loader::SourceSet;
use crate::project::{ProjectDocument, Timestamp};
use log::{debug, warn};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// MIME type recorded for pictures re-encoded as JPEG.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("page {page}: picture {picture:?} is on a page without a source project")]
    Untagged { page: usize, picture: String },
    #[error("page {page}: source project {project} is not loaded")]
    UnknownProject { page: usize, project: String },
    #[error("page {page}: picture {picture:?} not found in {project}")]
    MissingImage {
        page: usize,
        project: String,
        picture: String,
    },
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// Knobs for picture normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeOptions {
    pub jpeg_quality: Quality,
    /// Picture ids starting with this tag get the orientation fix.
    pub rotation_fix_prefix: String,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl MaterializeOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            jpeg_quality: Quality::new(settings.images.jpeg_quality),
            rotation_fix_prefix: settings.images.rotation_fix_prefix.clone(),
        }
    }
}

/// Why a normalization step left the file alone.
#[derive(Debug)]
pub enum Unchanged {
    /// The step does not apply to this picture.
    NotApplicable,
    /// No EXIF data, no orientation tag, or an orientation needing no rotation.
    NoOrientation,
    /// The backend failed; the previous file is kept.
    Failed(BackendError),
}

/// Outcome of one normalization step.
#[derive(Debug)]
pub enum Normalized {
    /// A new file was written; continue with it.
    Rewritten(PathBuf),
    Unchanged(Unchanged),
}

/// One unique image to be written to the output archive.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedImage {
    /// Uppercase hex SHA-1 of the file.
    pub id: String,
    /// File holding the final bytes.
    pub path: PathBuf,
    /// Picture name of the first reference, used as the archive entry comment.
    pub original_name: String,
    /// Normalized `lastModified` of the first reference, in milliseconds.
    pub modified: Option<i64>,
}

/// Counters for one materialization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeStats {
    /// Picture references visited.
    pub pictures: usize,
    /// Distinct images after dedup.
    pub unique: usize,
    /// Source files re-encoded from HEIC.
    pub transcoded: usize,
    /// Source files rotated upright.
    pub rotated: usize,
    /// Best-effort steps that failed and were skipped.
    pub warnings: usize,
    /// HEIC files kept as they were because this build cannot decode HEIF.
    pub heic_unsupported: usize,
}

/// The rewritten document plus the images it references.
#[derive(Debug)]
pub struct MaterializedProject {
    pub document: ProjectDocument,
    /// Unique images in first-reference order.
    pub images: Vec<MaterializedImage>,
    pub stats: MaterializeStats,
}

/// A source file after normalization. Cached per source file and HEIC-ness
/// of the referencing name, so a picture referenced from several pages is
/// only processed once.
#[derive(Debug, Clone)]
struct Prepared {
    path: PathBuf,
    hash: String,
    transcoded: bool,
}

/// Whether a picture name marks a HEIC file.
pub fn is_heic_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".heic")
}

/// SHA-1 of a file's contents, uppercase hex.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha1::digest(&bytes);
    Ok(format!("{:X}", digest))
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Re-encode a HEIC picture as JPEG next to `path`.
pub fn transcode_heic(
    backend: &impl ImageBackend,
    path: &Path,
    picture_name: &str,
    quality: Quality,
) -> Normalized {
    if !is_heic_name(picture_name) {
        return Normalized::Unchanged(Unchanged::NotApplicable);
    }
    let output = sibling(path, ".jpg");
    let params = TranscodeParams {
        source: path.to_path_buf(),
        output: output.clone(),
        quality,
    };
    match backend.transcode_to_jpeg(&params) {
        Ok(()) => Normalized::Rewritten(output),
        Err(e) => Normalized::Unchanged(Unchanged::Failed(e)),
    }
}

/// Bake the EXIF orientation into the pixels of a filesystem-source picture.
pub fn fix_orientation(
    backend: &impl ImageBackend,
    path: &Path,
    picture_id: &str,
    options: &MaterializeOptions,
) -> Normalized {
    if !picture_id.starts_with(&options.rotation_fix_prefix) {
        return Normalized::Unchanged(Unchanged::NotApplicable);
    }
    let rotation = match backend.read_orientation(path) {
        Ok(Some(tag)) => match Rotation::from_orientation(tag) {
            Some(rotation) => rotation,
            None => return Normalized::Unchanged(Unchanged::NoOrientation),
        },
        Ok(None) => return Normalized::Unchanged(Unchanged::NoOrientation),
        Err(e) => return Normalized::Unchanged(Unchanged::Failed(e)),
    };
    let output = sibling(path, ".upright");
    let params = RotateParams {
        source: path.to_path_buf(),
        output: output.clone(),
        rotation,
        quality: options.jpeg_quality,
    };
    match backend.rotate(&params) {
        Ok(()) => Normalized::Rewritten(output),
        Err(e) => Normalized::Unchanged(Unchanged::Failed(e)),
    }
}

/// Locate the extracted file behind a picture reference on page `page`.
pub fn resolve_picture(
    sources: &SourceSet,
    page: usize,
    project_key: Option<&str>,
    picture_id: &str,
) -> Result<PathBuf, MaterializeError> {
    let key = project_key.ok_or_else(|| MaterializeError::Untagged {
        page,
        picture: picture_id.to_string(),
    })?;
    let project = sources
        .by_key(key)
        .ok_or_else(|| MaterializeError::UnknownProject {
            page,
            project: key.to_string(),
        })?;
    project
        .image_path(picture_id)
        .filter(|path| path.is_file())
        .ok_or_else(|| MaterializeError::MissingImage {
            page,
            project: key.to_string(),
            picture: picture_id.to_string(),
        })
}

/// Run both normalization steps on one source file and hash the result.
fn prepare(
    backend: &impl ImageBackend,
    original: &Path,
    picture_id: &str,
    picture_name: &str,
    options: &MaterializeOptions,
    stats: &mut MaterializeStats,
) -> Result<Prepared, MaterializeError> {
    let mut current = original.to_path_buf();
    let mut transcoded = false;

    match transcode_heic(backend, &current, picture_name, options.jpeg_quality) {
        Normalized::Rewritten(path) => {
            debug!("{picture_name}: re-encoded as JPEG");
            stats.transcoded += 1;
            transcoded = true;
            current = path;
        }
        Normalized::Unchanged(Unchanged::Failed(BackendError::Unsupported(e))) => {
            warn!("{picture_name}: kept as HEIC: {e}");
            stats.heic_unsupported += 1;
            stats.warnings += 1;
        }
        Normalized::Unchanged(Unchanged::Failed(e)) => {
            warn!("{picture_name}: HEIC conversion failed, keeping original: {e}");
            stats.warnings += 1;
        }
        Normalized::Unchanged(_) => {}
    }

    match fix_orientation(backend, &current, picture_id, options) {
        Normalized::Rewritten(path) => {
            debug!("{picture_name}: rotated upright");
            stats.rotated += 1;
            current = path;
        }
        Normalized::Unchanged(Unchanged::NoOrientation) => {
            debug!("{picture_name}: no EXIF orientation to apply");
        }
        Normalized::Unchanged(Unchanged::Failed(e)) => {
            warn!("{picture_name}: orientation fix failed, keeping file: {e}");
            stats.warnings += 1;
        }
        Normalized::Unchanged(Unchanged::NotApplicable) => {}
    }

    let hash = content_hash(&current).map_err(|source| MaterializeError::Read {
        path: current.clone(),
        source,
    })?;
    Ok(Prepared {
        path: current,
        hash,
        transcoded,
    })
}

/// Normalize, hash, and dedup every picture of `document`.
///
/// The input document is left untouched; the result holds a rewritten copy.
pub fn materialize(
    document: &ProjectDocument,
    sources: &SourceSet,
    backend: &impl ImageBackend,
    options: &MaterializeOptions,
) -> Result<MaterializedProject, MaterializeError> {
    let mut document = document.clone();
    let mut images: Vec<MaterializedImage> = Vec::new();
    let mut written: HashSet<String> = HashSet::new();
    let mut prepared: HashMap<(PathBuf, bool), Prepared> = HashMap::new();
    let mut stats = MaterializeStats::default();

    for (index, slot) in document.pages.iter_mut().enumerate() {
        let Some(page) = slot.page_mut() else {
            continue;
        };
        let project_key = page.source_project.clone();

        for element in page.elements_mut() {
            if !element.is_picture() {
                continue;
            }
            let Some(Some(picture)) = element.picture.as_mut() else {
                continue;
            };
            stats.pictures += 1;

            let original = resolve_picture(sources, index, project_key.as_deref(), &picture.id)?;

            let cache_key = (original, is_heic_name(&picture.name));
            let ready = match prepared.get(&cache_key) {
                Some(ready) => ready.clone(),
                None => {
                    let ready = prepare(
                        backend,
                        &cache_key.0,
                        &picture.id,
                        &picture.name,
                        options,
                        &mut stats,
                    )?;
                    prepared.insert(cache_key, ready.clone());
                    ready
                }
            };

            if ready.transcoded {
                picture.mime_type = Some(Some(JPEG_MIME_TYPE.to_string()));
            }
            let timestamp = picture.effective_timestamp().cloned();
            if let Some(timestamp) = &timestamp {
                picture.last_modified = Some(Some(timestamp.clone()));
            }
            picture.id = ready.hash.clone();

            if written.insert(ready.hash.clone()) {
                images.push(MaterializedImage {
                    id: ready.hash,
                    path: ready.path,
                    original_name: picture.name.clone(),
                    modified: timestamp.as_ref().and_then(Timestamp::millis),
                });
            }
        }
    }

    stats.unique = images.len();
    if stats.heic_unsupported > 0 {
        warn!(
            "{} HEIC picture(s) kept as HEIC: built without the `heif` feature",
            stats.heic_unsupported
        );
    }
    Ok(MaterializedProject {
        document,
        images,
        stats,
    })
}
