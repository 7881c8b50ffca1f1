//! Run summary and post-run census.

use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

use crate::classify::TEXT_SUFFIX;
use crate::execution::{MoveOutcome, MoveResult};
use crate::merge::MergeReport;

/// Aggregate counts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub stamp: String,
    /// Source files found at the start of the run
    pub discovered: usize,
    /// Moves that reached a valid destination (artifacts count once)
    pub routed: usize,
    /// Source files that reached a valid destination, directly or merged
    pub routed_sources: usize,
    pub exceptioned: usize,
    pub merge_conflicts_resolved: usize,
    pub source_missing: usize,
    pub rejected: usize,
    pub failed: usize,
    pub merged_groups: usize,
    pub archives_written: usize,
    pub audit_entries: usize,
    /// Bytes in the source directory before anything moved
    pub source_bytes: u64,
    pub census: Census,
    pub elapsed_ms: u64,
    /// One line per per-file problem
    pub faults: Vec<String>,
}

impl RunSummary {
    pub fn new(stamp: impl Into<String>, discovered: usize) -> Self {
        Self {
            stamp: stamp.into(),
            discovered,
            ..Self::default()
        }
    }

    /// Fold the merge stage's losses into the totals
    pub fn record_merge(&mut self, report: &MergeReport) {
        self.merged_groups = report.artifacts.len();
        self.archives_written = report.archives_written;
        self.source_missing += report.source_missing.len();
        self.failed += report.unreadable.len();
        self.faults.extend(report.faults.iter().cloned());
    }

    /// Fold one mover outcome into the totals
    pub fn record_move(&mut self, result: &MoveResult) {
        let sources = result.decision.represents;
        let name = &result.decision.file_name;

        match &result.outcome {
            MoveOutcome::Routed {
                conflicts_resolved,
                warning,
                ..
            } => {
                self.routed += 1;
                self.routed_sources += sources;
                self.merge_conflicts_resolved += conflicts_resolved;
                if let Some(warning) = warning {
                    self.faults.push(format!("{}: {}", name, warning));
                }
            }
            MoveOutcome::Excepted { .. } => self.exceptioned += sources,
            MoveOutcome::SourceMissing => {
                self.source_missing += sources;
                self.faults.push(format!(
                    "Source file does not exist: {}",
                    result.decision.source.display()
                ));
            }
            MoveOutcome::Rejected { reason } => {
                self.rejected += sources;
                self.faults.push(format!("{}: {}", name, reason));
            }
            MoveOutcome::Failed { error } => {
                self.failed += sources;
                self.faults.push(format!("{}: {}", name, error));
            }
        }
    }

    /// Sum of every terminal outcome, in source files
    pub fn accounted(&self) -> usize {
        self.routed_sources + self.exceptioned + self.source_missing + self.rejected + self.failed
    }

    /// Every discovered file ended in exactly one outcome
    pub fn is_balanced(&self) -> bool {
        self.accounted() == self.discovered
    }
}

/// What the filesystem looks like once the run is over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Census {
    /// Text files anywhere under the valid tree, exception bucket excluded
    pub valid_files: usize,
    pub exception_files: usize,
    /// Text files still waiting in the source directory
    pub remaining_sources: usize,
}

impl Census {
    pub fn take(valid_root: &Path, exception_dir: &Path, source_dir: &Path) -> Self {
        let valid_files = WalkDir::new(valid_root)
            .into_iter()
            .filter_entry(|entry| entry.path() != exception_dir)
            .filter_map(|entry| entry.ok())
            .filter(is_text_file)
            .count();

        Self {
            valid_files,
            exception_files: count_text_files(exception_dir, usize::MAX),
            remaining_sources: count_text_files(source_dir, 1),
        }
    }
}

fn count_text_files(root: &Path, max_depth: usize) -> usize {
    WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(is_text_file)
        .count()
}

fn is_text_file(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.file_type().is_file() && name.ends_with(TEXT_SUFFIX) && !name.starts_with('.')
}
