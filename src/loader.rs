//! Source archive loading.
//!
//! Stage 1 of the merge pipeline. Every archive named in the merge config's
//! `source-mapping` is unpacked into its own subdirectory of a temporary
//! working area, and its documents are parsed:
//!
//! ```text
//! <workdir>/
//! ├── 00-anna/                       # First alias, in declared order
//! │   ├── mimetype
//! │   ├── META-INF/
//! │   │   └── metadata.json          # Only read for the first project
//! │   └── PROJECT/
//! │       ├── projectDescriptor.json
//! │       └── IMAGES/
//! │           └── <opaque picture id>
//! └── 01-ben/
//!     └── ...
//! ```
//!
//! The resulting [`SourceSet`] owns the working area. Later stages read image
//! files through it, so it must outlive packaging; dropping it removes every
//! extracted file.
//!
//! Archives written by the desktop editor use `\` as the path separator
//! inside the zip. Both separators are accepted and normalized to the host
//! layout. Entries that would land outside the extraction directory are
//! refused.

use crate::config::OrderedMap;
use crate::project::{ProjectDocument, parse_document};
use log::{debug, info};
use serde_json::Value;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

/// Location of the shared metadata document inside a project archive.
pub const METADATA_PATH: &str = "META-INF/metadata.json";
/// Location of the page descriptor inside a project archive.
pub const DESCRIPTOR_PATH: &str = "PROJECT/projectDescriptor.json";
/// Directory holding a project's pictures.
pub const IMAGES_DIR: &str = "PROJECT/IMAGES";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot create working directory: {0}")]
    Workdir(#[source] io::Error),
    #[error("cannot open source archive {}: {source}", archive.display())]
    Open { archive: PathBuf, source: io::Error },
    #[error("{} is not a valid project archive: {source}", archive.display())]
    InvalidArchive { archive: PathBuf, source: ZipError },
    #[error("{}: entry {entry:?} escapes the extraction directory", archive.display())]
    UnsafeEntry { archive: PathBuf, entry: String },
    #[error("{}: cannot extract {entry:?}: {source}", archive.display())]
    Extract {
        archive: PathBuf,
        entry: String,
        source: io::Error,
    },
    #[error("{}: missing {document}", archive.display())]
    MissingDocument {
        archive: PathBuf,
        document: &'static str,
    },
    #[error("{}: malformed {document}: {source}", archive.display())]
    MalformedDocument {
        archive: PathBuf,
        document: &'static str,
        source: serde_json::Error,
    },
}

impl LoadError {
    /// The archive this error is about, if any.
    pub fn archive(&self) -> Option<&Path> {
        match self {
            LoadError::Workdir(_) => None,
            LoadError::Open { archive, .. }
            | LoadError::InvalidArchive { archive, .. }
            | LoadError::UnsafeEntry { archive, .. }
            | LoadError::Extract { archive, .. }
            | LoadError::MissingDocument { archive, .. }
            | LoadError::MalformedDocument { archive, .. } => Some(archive),
        }
    }
}

/// One unpacked source archive.
#[derive(Debug)]
pub struct SourceProject {
    /// Archive path exactly as written in the merge config. Pages copied from
    /// this project carry it as their `sourceProject` tag.
    pub key: String,
    /// Alias the archive was first loaded under.
    pub alias: String,
    /// Extraction directory.
    pub root: PathBuf,
    pub document: ProjectDocument,
}

impl SourceProject {
    /// Path of a picture in this project's image store.
    ///
    /// Ids are resolved the same way archive entries are extracted, so an id
    /// containing separators still finds its file. Returns `None` for ids that
    /// would point outside the image store.
    pub fn image_path(&self, picture_id: &str) -> Option<PathBuf> {
        let relative = entry_path(&picture_id.replace('\\', "/"))?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(IMAGES_DIR).join(relative))
    }
}

/// Every loaded source project plus the working area holding their files.
#[derive(Debug)]
pub struct SourceSet {
    workdir: TempDir,
    projects: Vec<SourceProject>,
    /// alias → index into `projects`, in declared order.
    aliases: Vec<(String, usize)>,
    metadata: Option<Value>,
}

impl SourceSet {
    /// Projects in load order (first alias of each distinct archive).
    pub fn projects(&self) -> &[SourceProject] {
        &self.projects
    }

    /// The project that provides the output header.
    pub fn first(&self) -> Option<&SourceProject> {
        self.projects.first()
    }

    pub fn by_key(&self, key: &str) -> Option<&SourceProject> {
        self.projects.iter().find(|p| p.key == key)
    }

    pub fn by_alias(&self, alias: &str) -> Option<&SourceProject> {
        self.aliases
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, index)| &self.projects[*index])
    }

    /// The shared metadata document of the first project.
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Resolve a picture file from a page's `sourceProject` tag and picture id.
    pub fn image_path(&self, key: &str, picture_id: &str) -> Option<PathBuf> {
        self.by_key(key)?.image_path(picture_id)
    }

    /// Root of the temporary working area.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }
}

/// Load every archive in `mapping`, resolving relative paths against `source_dir`.
///
/// Archives are processed in declared order. An alias whose archive path was
/// already loaded under an earlier alias reuses that project.
pub fn load_sources(
    mapping: &OrderedMap<String>,
    source_dir: &Path,
) -> Result<SourceSet, LoadError> {
    let workdir = TempDir::new().map_err(LoadError::Workdir)?;
    let mut set = SourceSet {
        workdir,
        projects: Vec::new(),
        aliases: Vec::new(),
        metadata: None,
    };

    for (alias, key) in mapping.iter() {
        if let Some(index) = set.projects.iter().position(|p| p.key == *key) {
            debug!("{alias}: reusing {key} loaded as {}", set.projects[index].alias);
            set.aliases.push((alias.to_string(), index));
            continue;
        }

        let archive = source_dir.join(key);
        let root = set
            .workdir
            .path()
            .join(working_dir_name(set.projects.len(), alias));
        extract_archive(&archive, &root)?;

        if set.metadata.is_none() {
            set.metadata = Some(read_document(&archive, &root, METADATA_PATH)?);
        }
        let document: ProjectDocument = read_document(&archive, &root, DESCRIPTOR_PATH)?;
        info!(
            "Loaded {alias} ({key}): {} pages, {} pictures",
            document.pages.len(),
            document.pictures().count()
        );

        set.aliases.push((alias.to_string(), set.projects.len()));
        set.projects.push(SourceProject {
            key: key.clone(),
            alias: alias.to_string(),
            root,
            document,
        });
    }

    Ok(set)
}

/// Directory name for the n-th extracted archive. Aliases are free-form, so
/// anything outside `[A-Za-z0-9_-]` is replaced.
fn working_dir_name(index: usize, alias: &str) -> String {
    let safe: String = alias
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{index:02}-{safe}")
}

/// Unpack `archive` into `dest`.
fn extract_archive(archive: &Path, dest: &Path) -> Result<(), LoadError> {
    let file = File::open(archive).map_err(|source| LoadError::Open {
        archive: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|source| LoadError::InvalidArchive {
        archive: archive.to_path_buf(),
        source,
    })?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|source| LoadError::InvalidArchive {
                archive: archive.to_path_buf(),
                source,
            })?;
        let name = entry.name().replace('\\', "/");
        let relative = entry_path(&name).ok_or_else(|| LoadError::UnsafeEntry {
            archive: archive.to_path_buf(),
            entry: name.clone(),
        })?;
        let extract_err = |source| LoadError::Extract {
            archive: archive.to_path_buf(),
            entry: name.clone(),
            source,
        };

        let target = dest.join(&relative);
        if entry.is_dir() || name.ends_with('/') {
            fs::create_dir_all(&target).map_err(extract_err)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(extract_err)?;
        }
        let mut out = File::create(&target).map_err(extract_err)?;
        io::copy(&mut entry, &mut out).map_err(extract_err)?;
    }

    Ok(())
}

/// Relative host path for a `/`-separated entry name, or `None` if the entry
/// could land outside the extraction directory.
///
/// Only a leading drive letter is refused; colons elsewhere are ordinary
/// file-name characters.
fn entry_path(name: &str) -> Option<PathBuf> {
    if name.starts_with('/') || has_drive_prefix(name) {
        return None;
    }
    let mut path = PathBuf::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => return None,
            part => path.push(part),
        }
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(path)
}

/// `C:` style drive letter at the start of a name.
fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn read_document<T: for<'de> serde::Deserialize<'de>>(
    archive: &Path,
    root: &Path,
    document: &'static str,
) -> Result<T, LoadError> {
    let bytes = match fs::read(root.join(document)) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(LoadError::MissingDocument {
                archive: archive.to_path_buf(),
                document,
            });
        }
        Err(source) => {
            return Err(LoadError::Extract {
                archive: archive.to_path_buf(),
                entry: document.to_string(),
                source,
            });
        }
    };
    parse_document(&bytes).map_err(|source| LoadError::MalformedDocument {
        archive: archive.to_path_buf(),
        document,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ArchiveBuilder, picture_page, sample_document};
    use serde_json::json;

    fn mapping(entries: &[(&str, &str)]) -> OrderedMap<String> {
        entries
            .iter()
            .map(|(a, p)| (a.to_string(), p.to_string()))
            .collect()
    }

    #[test]
    fn loads_projects_in_declared_order() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({"owner": "first"}))
            .descriptor(sample_document("one", vec![]))
            .write(&tmp.path().join("one.prj"));
        ArchiveBuilder::new()
            .metadata(json!({"owner": "second"}))
            .descriptor(sample_document("two", vec![]))
            .write(&tmp.path().join("two.prj"));

        let set = load_sources(&mapping(&[("B", "two.prj"), ("A", "one.prj")]), tmp.path()).unwrap();

        let keys: Vec<&str> = set.projects().iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["two.prj", "one.prj"]);
        assert_eq!(set.first().unwrap().document.descriptor.name, "two");
        assert_eq!(set.by_alias("A").unwrap().key, "one.prj");
        // First metadata wins
        assert_eq!(set.metadata(), Some(&json!({"owner": "second"})));
    }

    #[test]
    fn later_metadata_is_never_read() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({"ok": true}))
            .descriptor(sample_document("one", vec![]))
            .write(&tmp.path().join("one.prj"));
        // Broken metadata in the second archive does not matter
        ArchiveBuilder::new()
            .entry("META-INF/metadata.json", b"{not json".to_vec())
            .descriptor(sample_document("two", vec![]))
            .write(&tmp.path().join("two.prj"));

        let set = load_sources(&mapping(&[("A", "one.prj"), ("B", "two.prj")]), tmp.path()).unwrap();
        assert_eq!(set.projects().len(), 2);
    }

    #[test]
    fn backslash_entries_are_normalized() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .entry("META-INF\\metadata.json", b"{}".to_vec())
            .entry(
                "PROJECT\\projectDescriptor.json",
                serde_json::to_vec(&sample_document("win", vec![picture_page("p", &[("img1", "a.jpg")])]))
                    .unwrap(),
            )
            .entry("PROJECT\\IMAGES\\img1", b"bytes".to_vec())
            .write(&tmp.path().join("win.prj"));

        let set = load_sources(&mapping(&[("W", "win.prj")]), tmp.path()).unwrap();
        let path = set.image_path("win.prj", "img1").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"bytes");
    }

    #[test]
    fn bom_prefixed_documents_load() {
        let tmp = TempDir::new().unwrap();
        let mut descriptor = "\u{feff}".as_bytes().to_vec();
        descriptor.extend(serde_json::to_vec(&sample_document("bom", vec![])).unwrap());
        ArchiveBuilder::new()
            .entry("META-INF/metadata.json", "\u{feff}{}".as_bytes().to_vec())
            .entry("PROJECT/projectDescriptor.json", descriptor)
            .write(&tmp.path().join("bom.prj"));

        let set = load_sources(&mapping(&[("A", "bom.prj")]), tmp.path()).unwrap();
        assert_eq!(set.first().unwrap().document.descriptor.name, "bom");
    }

    #[test]
    fn shared_archive_is_loaded_once() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .descriptor(sample_document("one", vec![]))
            .write(&tmp.path().join("one.prj"));

        let set = load_sources(&mapping(&[("A", "one.prj"), ("B", "one.prj")]), tmp.path()).unwrap();
        assert_eq!(set.projects().len(), 1);
        assert_eq!(set.by_alias("B").unwrap().alias, "A");
    }

    #[test]
    fn missing_archive_names_path() {
        let tmp = TempDir::new().unwrap();
        let err = load_sources(&mapping(&[("A", "gone.prj")]), tmp.path()).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
        assert_eq!(err.archive(), Some(tmp.path().join("gone.prj").as_path()));
        assert!(err.to_string().contains("gone.prj"));
    }

    #[test]
    fn not_a_zip_is_invalid_archive() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("bad.prj"), b"plain text").unwrap();
        let err = load_sources(&mapping(&[("A", "bad.prj")]), tmp.path()).unwrap_err();
        assert!(matches!(err, LoadError::InvalidArchive { .. }));
    }

    #[test]
    fn missing_descriptor_is_error() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .write(&tmp.path().join("one.prj"));
        let err = load_sources(&mapping(&[("A", "one.prj")]), tmp.path()).unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingDocument {
                document: DESCRIPTOR_PATH,
                ..
            }
        ));
    }

    #[test]
    fn malformed_descriptor_is_error() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .entry("PROJECT/projectDescriptor.json", b"[1, 2".to_vec())
            .write(&tmp.path().join("one.prj"));
        let err = load_sources(&mapping(&[("A", "one.prj")]), tmp.path()).unwrap_err();
        assert!(matches!(err, LoadError::MalformedDocument { .. }));
    }

    #[test]
    fn traversal_entry_is_refused() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .descriptor(sample_document("one", vec![]))
            .entry("PROJECT/../../evil.txt", b"x".to_vec())
            .write(&tmp.path().join("one.prj"));
        let err = load_sources(&mapping(&[("A", "one.prj")]), tmp.path()).unwrap_err();
        assert!(matches!(err, LoadError::UnsafeEntry { .. }));
    }

    #[test]
    fn workdir_is_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .descriptor(sample_document("one", vec![]))
            .write(&tmp.path().join("one.prj"));
        let set = load_sources(&mapping(&[("A", "one.prj")]), tmp.path()).unwrap();
        let workdir = set.workdir().to_path_buf();
        assert!(workdir.exists());
        drop(set);
        assert!(!workdir.exists());
    }

    #[test]
    fn entry_path_rules() {
        assert_eq!(entry_path("a/b/c"), Some(PathBuf::from("a/b/c")));
        assert_eq!(entry_path("./a//b"), Some(PathBuf::from("a/b")));
        assert_eq!(entry_path("/etc/passwd"), None);
        assert_eq!(entry_path("a/../../b"), None);
        assert_eq!(entry_path("C:/x"), None);
        assert_eq!(entry_path("c:x"), None);
        assert_eq!(
            entry_path("PROJECT/IMAGES/PGFileSystemSourcePrefix+2023-01-01T10:00"),
            Some(PathBuf::from(
                "PROJECT/IMAGES/PGFileSystemSourcePrefix+2023-01-01T10:00"
            ))
        );
    }

    #[test]
    fn colon_in_picture_id_loads() {
        let id = "PGFileSystemSourcePrefix+2023-01-01T10:00";
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .descriptor(sample_document(
                "one",
                vec![picture_page("p", &[(id, "a.jpg")])],
            ))
            .image(id, b"timed".to_vec())
            .write(&tmp.path().join("one.prj"));

        let set = load_sources(&mapping(&[("A", "one.prj")]), tmp.path()).unwrap();
        let path = set.image_path("one.prj", id).unwrap();
        assert!(path.starts_with(set.workdir()));
        assert_eq!(fs::read(path).unwrap(), b"timed");
    }

    #[test]
    fn float_timestamps_load() {
        let mut page = picture_page("p", &[("img", "a.jpg")]);
        page["layers"][0]["elements"][0]["picture"]["lastModified"] = json!(1600000000000.0);
        page["layers"][0]["elements"][0]["picture"]["exifDate"] = json!(1500000000000.25);
        let tmp = TempDir::new().unwrap();
        ArchiveBuilder::new()
            .metadata(json!({}))
            .descriptor(sample_document("one", vec![page]))
            .image("img", b"x".to_vec())
            .write(&tmp.path().join("one.prj"));

        let set = load_sources(&mapping(&[("A", "one.prj")]), tmp.path()).unwrap();
        let document = &set.first().unwrap().document;
        let picture = document.pictures().next().unwrap();
        assert_eq!(
            picture.last_modified.clone().flatten().and_then(|t| t.millis()),
            Some(1_600_000_000_000)
        );
        assert_eq!(
            picture.effective_timestamp().and_then(|t| t.millis()),
            Some(1_500_000_000_000)
        );
        let written = serde_json::to_value(document).unwrap();
        assert_eq!(
            written["pages"][0]["layers"][0]["elements"][0]["picture"]["lastModified"],
            json!(1600000000000.0)
        );
    }

    #[test]
    fn image_path_stays_inside_image_store() {
        let project = SourceProject {
            key: "k".into(),
            alias: "a".into(),
            root: PathBuf::from("/w/00-a"),
            document: serde_json::from_value(sample_document("x", vec![])).unwrap(),
        };
        assert_eq!(
            project.image_path("IMG1"),
            Some(PathBuf::from("/w/00-a/PROJECT/IMAGES/IMG1"))
        );
        assert_eq!(
            project.image_path("sub\\IMG2"),
            Some(PathBuf::from("/w/00-a/PROJECT/IMAGES/sub/IMG2"))
        );
        assert_eq!(project.image_path("../secret"), None);
        assert_eq!(project.image_path("/etc/passwd"), None);
        assert_eq!(project.image_path(""), None);
    }

    #[test]
    fn working_dir_name_sanitizes_alias() {
        assert_eq!(working_dir_name(0, "anna"), "00-anna");
        assert_eq!(working_dir_name(3, "../x y"), "03-___x_y");
    }
}
