//! Merge planning.
//!
//! Stage 2 of the merge pipeline. Builds the output project document from the
//! loaded sources:
//!
//! 1. The header (`descriptor`, `productId`, `options`, `compositionMetaInfo`)
//!    is taken from the first source project, with a fresh descriptor id and
//!    the configured project name.
//! 2. The output gets one empty slot per calendar page.
//! 3. Each assignment from the config's `pages` table deep-copies a source
//!    page into its destination slot, tagging it with the project key so the
//!    materializer can find its pictures later.
//!
//! Assignments are applied in declared order. When two aliases target the same
//! slot, the one listed last wins.
//!
//! ## Deep copy
//!
//! The editor requires ids to be unique within a project. A copied page gets a
//! fresh page id and a fresh id on every element of every layer. Everything
//! else, pictures included, is copied unchanged.

use crate::calendar::CalendarSlot;
use crate::config::MergeConfig;
use crate::loader::SourceSet;
use crate::project::{PageSlot, ProjectDocument};
use log::debug;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("source-mapping is empty")]
    NoSources,
    #[error("unknown calendar slot {name:?} in {location}")]
    UnknownSlot { name: String, location: String },
    #[error("page {slot}: alias {alias:?} is not listed in source-mapping")]
    UnknownAlias { slot: String, alias: String },
    #[error("page {slot}: {project} has no page {source_slot}")]
    MissingSourcePage {
        slot: CalendarSlot,
        project: String,
        source_slot: CalendarSlot,
    },
    #[error("page {slot}: project {project} is not loaded")]
    UnloadedProject { slot: CalendarSlot, project: String },
}

/// One resolved line of the config's `pages` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub destination: CalendarSlot,
    pub alias: String,
    /// Archive path the alias maps to.
    pub project_key: String,
    pub source: CalendarSlot,
}

/// Resolve every slot name and alias of `config` without touching any archive.
///
/// The result is in application order: destination slots as listed, and for
/// each destination its aliases as listed.
pub fn resolve_assignments(config: &MergeConfig) -> Result<Vec<Assignment>, PlanError> {
    if config.source_mapping.is_empty() {
        return Err(PlanError::NoSources);
    }

    let mut assignments = Vec::new();
    for (slot_name, sources) in config.pages.iter() {
        let destination =
            CalendarSlot::from_name(slot_name).ok_or_else(|| PlanError::UnknownSlot {
                name: slot_name.to_string(),
                location: "pages".to_string(),
            })?;

        for (alias, source_name) in sources.iter() {
            let project_key =
                config
                    .source_mapping
                    .get(alias)
                    .ok_or_else(|| PlanError::UnknownAlias {
                        slot: slot_name.to_string(),
                        alias: alias.to_string(),
                    })?;
            let source =
                CalendarSlot::from_name(source_name).ok_or_else(|| PlanError::UnknownSlot {
                    name: source_name.clone(),
                    location: format!("pages.{slot_name}.{alias}"),
                })?;

            assignments.push(Assignment {
                destination,
                alias: alias.to_string(),
                project_key: project_key.clone(),
                source,
            });
        }
    }

    Ok(assignments)
}

/// Build the merged project document.
pub fn plan(config: &MergeConfig, sources: &SourceSet) -> Result<ProjectDocument, PlanError> {
    let assignments = resolve_assignments(config)?;
    let first = sources.first().ok_or(PlanError::NoSources)?;

    let mut descriptor = first.document.descriptor.clone();
    descriptor.id = Uuid::new_v4().to_string();
    descriptor.name = config.name.clone();

    let mut document = ProjectDocument {
        descriptor,
        product_id: first.document.product_id.clone(),
        options: first.document.options.clone(),
        composition_meta_info: first.document.composition_meta_info.clone(),
        pages: vec![PageSlot::Empty; CalendarSlot::COUNT],
    };

    for assignment in &assignments {
        let project = sources.by_key(&assignment.project_key).ok_or_else(|| {
            PlanError::UnloadedProject {
                slot: assignment.destination,
                project: assignment.project_key.clone(),
            }
        })?;
        let page = project
            .document
            .pages
            .get(assignment.source.index())
            .ok_or_else(|| PlanError::MissingSourcePage {
                slot: assignment.destination,
                project: assignment.project_key.clone(),
                source_slot: assignment.source,
            })?;

        let mut copy = deep_copy_page(page);
        if let Some(page) = copy.page_mut() {
            page.source_project = Some(assignment.project_key.clone());
        }
        debug!(
            "{} <- {}:{}",
            assignment.destination, assignment.alias, assignment.source
        );
        document.pages[assignment.destination.index()] = copy;
    }

    Ok(document)
}

/// Clone a page slot with fresh ids on the page and every element.
pub fn deep_copy_page(slot: &PageSlot) -> PageSlot {
    let mut copy = slot.clone();
    if let Some(page) = copy.page_mut() {
        page.id = Uuid::new_v4().to_string();
        for element in page.elements_mut() {
            element.id = Uuid::new_v4().to_string();
        }
    }
    copy
}
