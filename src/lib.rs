//! # Photobook Merge
//!
//! Builds a new photo-book calendar project by picking pages out of several
//! existing ones. Each source is a `.prj` archive from the desktop editor; the
//! output is a new `.prj` archive the editor opens like any other project.
//!
//! # Architecture: Four-Stage Pipeline
//!
//! ```text
//! 1. Load         source archives  →  SourceSet        (extracted working area)
//! 2. Plan         merge config     →  ProjectDocument  (13 calendar slots)
//! 3. Materialize  document         →  content-addressed images
//! 4. Package      document+images  →  <name>.prj
//! ```
//!
//! Stages 3 and 4 run together inside the archive [`package::Packager`], but
//! stay separate functions: the materializer folds the planned document into a
//! new one with rewritten picture ids, and the packager folds in the text
//! permission policy before writing.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`calendar`] | The 13 calendar slots (Cover, January … December) |
//! | [`project`] | Typed project document model, lossless for unknown fields |
//! | [`config`] | Merge config (JSON) and run settings (TOML over stock defaults) |
//! | [`loader`] | Stage 1: extract source archives into a temporary working area |
//! | [`planner`] | Stage 2: resolve assignments and deep-copy pages into slots |
//! | [`imaging`] | HEIC → JPEG, EXIF orientation, rotation |
//! | [`materialize`] | Stage 3: normalize, hash, and dedup pictures |
//! | [`package`] | Stage 4: write the archive (direct or directory-first) |
//! | [`pipeline`] | Wires the stages together: `build` and `check` |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Content-Addressed Pictures
//!
//! Source projects name their pictures with opaque ids that only mean
//! something inside that project. The merged project renames every picture to
//! the uppercase SHA-1 of its final bytes, so two sources that share a photo
//! store it once and ids can never collide across sources.
//!
//! ## Lossless Documents
//!
//! The editor's document format has far more fields than the merge touches.
//! Every typed struct in [`project`] carries a `#[serde(flatten)]` map for the
//! rest, so unknown fields survive a load → merge → write round trip.
//!
//! ## Ordered Config
//!
//! Config maps keep their declared order ([`config::OrderedMap`]). The first
//! `source-mapping` entry supplies the output header and metadata, and
//! assignments to the same slot resolve last-writer-wins.
//!
//! ## No Partial Output
//!
//! The working area is a `tempfile::TempDir` removed on drop, and the archive
//! is written to a temporary file that is renamed into place only after the
//! last entry is flushed.

pub mod calendar;
pub mod config;
pub mod imaging;
pub mod loader;
pub mod materialize;
pub mod output;
pub mod package;
pub mod pipeline;
pub mod planner;
pub mod project;

#[cfg(test)]
pub(crate) mod test_helpers;
