//! End-to-end merge: config → sources → plan → archive.
//!
//! ```text
//! 1. Resolve   merge config  →  assignments   (no archive opened yet)
//! 2. Load      source-mapping →  SourceSet    (extracted working area)
//! 3. Plan      assignments   →  ProjectDocument
//! 4. Pack      document      →  <output_dir>/<name>.prj
//! ```
//!
//! [`build`] runs every stage with the [`RustBackend`];
//! [`build_with_backend`] takes any [`ImageBackend`] so tests can record image
//! operations instead of decoding. [`check`] stops after planning and writes
//! nothing.

use crate::calendar::CalendarSlot;
use crate::config::{ConfigError, MergeConfig, PackagingStrategy, Settings};
use crate::imaging::{ImageBackend, RustBackend};
use crate::loader::{LoadError, SourceSet, load_sources};
use crate::materialize::MaterializeOptions;
use crate::package::{ArchivePackager, DirectoryPackager, PackError, PackReport, Packager};
use crate::planner::{Assignment, PlanError, plan, resolve_assignments};
use crate::project::ProjectDocument;
use log::info;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Source error: {0}")]
    Load(#[from] LoadError),
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),
    #[error("Packaging error: {0}")]
    Pack(#[from] PackError),
}

/// A loaded source project, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub alias: String,
    pub archive: String,
    /// Non-empty page slots in the source.
    pub pages: usize,
    pub pictures: usize,
}

/// What ended up in one calendar slot of the output.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPage {
    pub slot: CalendarSlot,
    /// `(alias, source slot)` of the winning assignment.
    pub origin: Option<(String, CalendarSlot)>,
    /// False when unassigned, or when the source slot itself was empty.
    pub filled: bool,
}

/// Result of [`check`]: the plan, without any output.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub name: String,
    pub sources: Vec<SourceSummary>,
    pub pages: Vec<PlannedPage>,
}

/// Result of [`build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub plan: CheckReport,
    pub pack: PackReport,
}

/// Run the full merge with the default image backend.
pub fn build(
    config: &MergeConfig,
    settings: &Settings,
    source_dir: &Path,
    output_dir: &Path,
) -> Result<BuildReport, BuildError> {
    let backend = RustBackend::new();
    build_with_backend(&backend, config, settings, source_dir, output_dir)
}

/// Run the full merge using a specific backend (allows testing with mock).
pub fn build_with_backend(
    backend: &impl ImageBackend,
    config: &MergeConfig,
    settings: &Settings,
    source_dir: &Path,
    output_dir: &Path,
) -> Result<BuildReport, BuildError> {
    let (sources, document, report) = prepare(config, source_dir)?;

    info!(
        "Packaging {} ({} strategy)",
        config.name, settings.output.strategy
    );
    let metadata = sources.metadata().cloned().unwrap_or(Value::Null);
    let pack = match settings.output.strategy {
        PackagingStrategy::Archive => {
            let options = MaterializeOptions::from_settings(settings);
            ArchivePackager::new(backend, options, output_dir).pack(&document, &metadata, &sources)?
        }
        PackagingStrategy::Directory => {
            DirectoryPackager::new(output_dir).pack(&document, &metadata, &sources)?
        }
    };

    Ok(BuildReport { plan: report, pack })
}

/// Validate, load and plan without writing an archive.
pub fn check(config: &MergeConfig, source_dir: &Path) -> Result<CheckReport, BuildError> {
    let (_sources, _document, report) = prepare(config, source_dir)?;
    Ok(report)
}

fn prepare(
    config: &MergeConfig,
    source_dir: &Path,
) -> Result<(SourceSet, ProjectDocument, CheckReport), BuildError> {
    config.validate()?;
    let assignments = resolve_assignments(config)?;

    info!(
        "Loading {} source archive(s) from {}",
        config.source_mapping.len(),
        source_dir.display()
    );
    let sources = load_sources(&config.source_mapping, source_dir)?;

    info!("Planning {}", config.name);
    let document = plan(config, &sources)?;

    let report = CheckReport {
        name: config.name.clone(),
        sources: summarize_sources(config, &sources),
        pages: summarize_pages(&assignments, &document),
    };
    Ok((sources, document, report))
}

fn summarize_sources(config: &MergeConfig, sources: &SourceSet) -> Vec<SourceSummary> {
    config
        .source_mapping
        .iter()
        .filter_map(|(alias, archive)| {
            let project = sources.by_alias(alias)?;
            Some(SourceSummary {
                alias: alias.to_string(),
                archive: archive.clone(),
                pages: project
                    .document
                    .pages
                    .iter()
                    .filter(|slot| !slot.is_empty())
                    .count(),
                pictures: project.document.pictures().count(),
            })
        })
        .collect()
}

fn summarize_pages(assignments: &[Assignment], document: &ProjectDocument) -> Vec<PlannedPage> {
    CalendarSlot::ALL
        .iter()
        .map(|&slot| {
            // Last assignment to a slot wins
            let origin = assignments
                .iter()
                .rev()
                .find(|a| a.destination == slot)
                .map(|a| (a.alias.clone(), a.source));
            let filled = document
                .pages
                .get(slot.index())
                .is_some_and(|page| !page.is_empty());
            PlannedPage {
                slot,
                origin,
                filled,
            }
        })
        .collect()
}
