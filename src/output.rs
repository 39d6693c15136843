//! CLI output formatting for the merge pipeline.
//!
//! # Information-First Display
//!
//! Each entity leads with its positional index and name. Where it came from
//! (archive path, source slot) follows as indented context or after an arrow,
//! so the output reads as an inventory of the merged book.
//!
//! # Output Format
//!
//! ## Check / plan
//!
//! ```text
//! Sources
//! 001 A (13 pages, 21 pictures)
//!     Source: proj1.prj
//! 002 B (12 pages, 0 pictures)
//!     Source: proj2.prj
//!
//! Pages
//! 000 Cover ← A Cover
//! 001 January ← B March
//! 002 February (empty)
//! ```
//!
//! ## Pack
//!
//! ```text
//! Archive: out/Merged.prj
//!     Strategy: archive
//!     Pictures: 21 (4 deduplicated)
//!     Images written: 17
//!     Transcoded: 2, rotated: 1, warnings: 0
//!     Text permissions cleared: 11
//! ```
//!
//! A build without HEIF decoding adds a last line for the HEIC pictures it
//! had to keep:
//!
//! ```text
//!     Warning: 2 HEIC pictures kept as HEIC (built without the `heif` feature)
//! ```
//!
//! # Architecture
//!
//! Each stage has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::calendar::CalendarSlot;
use crate::package::PackReport;
use crate::pipeline::{CheckReport, PlannedPage, SourceSummary};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format an index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Check / plan output
// ============================================================================

fn source_lines(index: usize, source: &SourceSummary) -> Vec<String> {
    vec![
        format!(
            "{} {} ({}, {})",
            format_index(index),
            source.alias,
            plural(source.pages, "page"),
            plural(source.pictures, "picture")
        ),
        format!("{}Source: {}", indent(1), source.archive),
    ]
}

fn page_line(page: &PlannedPage) -> String {
    let header = format!("{} {}", format_index(page.slot.index()), page.slot);
    match &page.origin {
        Some((alias, source)) if page.filled => format!("{header} ← {alias} {source}"),
        Some((alias, source)) => format!("{header} ← {alias} {source} (empty in source)"),
        None => format!("{header} (empty)"),
    }
}

/// Format the loaded sources and the planned page of every calendar slot.
pub fn format_check_output(report: &CheckReport) -> Vec<String> {
    let mut lines = vec!["Sources".to_string()];
    for (i, source) in report.sources.iter().enumerate() {
        lines.extend(source_lines(i + 1, source));
    }

    lines.push(String::new());
    lines.push("Pages".to_string());
    lines.extend(report.pages.iter().map(page_line));

    let filled = report.pages.iter().filter(|p| p.filled).count();
    lines.push(String::new());
    lines.push(format!(
        "{}: {} of {} filled",
        report.name,
        plural(filled, "page"),
        CalendarSlot::COUNT
    ));
    lines
}

pub fn print_check_output(report: &CheckReport) {
    for line in format_check_output(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Pack output
// ============================================================================

/// Format the packaging summary.
pub fn format_pack_output(report: &PackReport) -> Vec<String> {
    let mut lines = vec![
        format!("Archive: {}", report.archive.display()),
        format!("{}Strategy: {}", indent(1), report.strategy),
        format!(
            "{}Pictures: {} ({} deduplicated)",
            indent(1),
            report.pictures,
            report.images_deduplicated
        ),
        format!("{}Images written: {}", indent(1), report.images_written),
    ];
    if let Some(stats) = &report.materialize {
        lines.push(format!(
            "{}Transcoded: {}, rotated: {}, warnings: {}",
            indent(1),
            stats.transcoded,
            stats.rotated,
            stats.warnings
        ));
    }
    if report.text_permissions_cleared > 0 {
        lines.push(format!(
            "{}Text permissions cleared: {}",
            indent(1),
            report.text_permissions_cleared
        ));
    }
    if let Some(stats) = report.materialize.filter(|s| s.heic_unsupported > 0) {
        lines.push(format!(
            "{}Warning: {} kept as HEIC (built without the `heif` feature)",
            indent(1),
            plural(stats.heic_unsupported, "HEIC picture")
        ));
    }
    lines
}

pub fn print_pack_output(report: &PackReport) {
    for line in format_pack_output(report) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PackagingStrategy;
    use crate::materialize::MaterializeStats;
    use std::path::PathBuf;

    fn check_report() -> CheckReport {
        let pages = CalendarSlot::ALL
            .iter()
            .map(|&slot| match slot {
                CalendarSlot::Cover => PlannedPage {
                    slot,
                    origin: Some(("A".into(), CalendarSlot::Cover)),
                    filled: true,
                },
                CalendarSlot::January => PlannedPage {
                    slot,
                    origin: Some(("B".into(), CalendarSlot::March)),
                    filled: true,
                },
                CalendarSlot::February => PlannedPage {
                    slot,
                    origin: Some(("B".into(), CalendarSlot::Cover)),
                    filled: false,
                },
                _ => PlannedPage {
                    slot,
                    origin: None,
                    filled: false,
                },
            })
            .collect();
        CheckReport {
            name: "Merged".into(),
            sources: vec![
                SourceSummary {
                    alias: "A".into(),
                    archive: "proj1.prj".into(),
                    pages: 13,
                    pictures: 1,
                },
                SourceSummary {
                    alias: "B".into(),
                    archive: "proj2.prj".into(),
                    pages: 12,
                    pictures: 0,
                },
            ],
            pages,
        }
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(0), "000");
        assert_eq!(format_index(12), "012");
    }

    #[test]
    fn check_output_sources() {
        let lines = format_check_output(&check_report());
        assert_eq!(lines[0], "Sources");
        assert_eq!(lines[1], "001 A (13 pages, 1 picture)");
        assert_eq!(lines[2], "    Source: proj1.prj");
        assert_eq!(lines[3], "002 B (12 pages, 0 pictures)");
    }

    #[test]
    fn check_output_pages() {
        let lines = format_check_output(&check_report());
        let pages = lines.iter().position(|l| l == "Pages").unwrap();
        assert_eq!(lines[pages + 1], "000 Cover ← A Cover");
        assert_eq!(lines[pages + 2], "001 January ← B March");
        assert_eq!(lines[pages + 3], "002 February ← B Cover (empty in source)");
        assert_eq!(lines[pages + 4], "003 March (empty)");
        assert_eq!(lines[pages + 13], "012 December (empty)");
        assert_eq!(lines.last().unwrap(), "Merged: 2 pages of 13 filled");
    }

    #[test]
    fn pack_output_archive_strategy() {
        let report = PackReport {
            archive: PathBuf::from("out/Merged.prj"),
            strategy: PackagingStrategy::Archive,
            pictures: 5,
            images_written: 4,
            images_deduplicated: 1,
            text_permissions_cleared: 2,
            materialize: Some(MaterializeStats {
                pictures: 5,
                unique: 4,
                transcoded: 1,
                rotated: 0,
                warnings: 0,
                heic_unsupported: 0,
            }),
        };
        let lines = format_pack_output(&report);
        assert_eq!(
            lines,
            vec![
                "Archive: out/Merged.prj",
                "    Strategy: archive",
                "    Pictures: 5 (1 deduplicated)",
                "    Images written: 4",
                "    Transcoded: 1, rotated: 0, warnings: 0",
                "    Text permissions cleared: 2",
            ]
        );
    }

    #[test]
    fn pack_output_warns_about_kept_heic() {
        let report = PackReport {
            archive: PathBuf::from("Merged.prj"),
            strategy: PackagingStrategy::Archive,
            pictures: 3,
            images_written: 3,
            images_deduplicated: 0,
            text_permissions_cleared: 0,
            materialize: Some(MaterializeStats {
                pictures: 3,
                unique: 3,
                transcoded: 0,
                rotated: 0,
                warnings: 2,
                heic_unsupported: 2,
            }),
        };
        let lines = format_pack_output(&report);
        assert_eq!(
            lines.last().unwrap(),
            "    Warning: 2 HEIC pictures kept as HEIC (built without the `heif` feature)"
        );
    }

    #[test]
    fn pack_output_directory_strategy_is_shorter() {
        let report = PackReport {
            archive: PathBuf::from("Merged.prj"),
            strategy: PackagingStrategy::Directory,
            pictures: 2,
            images_written: 2,
            images_deduplicated: 0,
            text_permissions_cleared: 0,
            materialize: None,
        };
        let lines = format_pack_output(&report);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "    Strategy: directory");
    }
}
