//! Per-file reports and the aggregated run summary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::{ArchiveEntry, DatePartition, FailureKind, RejectReason};

/// Terminal state of one file within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// A new archive entry was written.
    Archived(ArchiveEntry),
    /// An identical archive entry already existed.
    Reused(ArchiveEntry),
    /// Already archived in an earlier run and unchanged since.
    Skipped,
    /// Dry run: the file would be archived into this partition.
    Planned(DatePartition),
    /// Excluded from the archive.
    Rejected(RejectReason),
    /// Archival failed.
    Failed {
        /// Failure class.
        kind: FailureKind,
        /// Operator-facing detail.
        detail: String,
    },
}

impl FileOutcome {
    /// Stable label used for metrics and logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Archived(_) => "archived",
            Self::Reused(_) => "reused",
            Self::Skipped => "skipped",
            Self::Planned(_) => "planned",
            Self::Rejected(_) => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// Source path.
    pub path: PathBuf,
    /// Terminal outcome.
    pub outcome: FileOutcome,
    /// Whether persisting the outcome to the manifest failed.
    pub manifest_failed: bool,
}

impl FileReport {
    /// Report without a manifest failure.
    #[must_use]
    pub const fn new(path: PathBuf, outcome: FileOutcome) -> Self {
        Self {
            path,
            outcome,
            manifest_failed: false,
        }
    }
}

/// A rejected or failed file, with enough detail to rerun it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProblemFile {
    /// Source path.
    pub path: PathBuf,
    /// `rejected` or `failed`.
    pub outcome: &'static str,
    /// Reason label (`offline_player`, `undated`, `write_failure`, ...).
    pub reason: &'static str,
    /// Human-readable detail.
    pub detail: String,
}

/// Aggregated counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Candidate files dispatched for processing.
    pub processed: u64,
    /// Files whose archive entry exists after the run (written or reused).
    pub archived: u64,
    /// Subset of `archived` whose existing entry was reused.
    pub reused: u64,
    /// Files skipped because an earlier run archived them.
    pub skipped: u64,
    /// Dry run: files that would be archived.
    pub planned: u64,
    /// Files excluded by include globs or not regular files.
    pub ignored: u64,
    /// Rejections by reason.
    pub rejected: BTreeMap<&'static str, u64>,
    /// Failures by kind.
    pub failed: BTreeMap<&'static str, u64>,
    /// Raw bytes archived.
    pub bytes_in: u64,
    /// Compressed bytes written.
    pub bytes_out: u64,
    /// Manifest writes that did not persist.
    pub manifest_failures: u64,
    /// Abandoned staging files removed at start-up.
    pub orphans_removed: u64,
    /// Whether cancellation stopped dispatch early.
    pub interrupted: bool,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Rejected and failed files.
    pub problems: Vec<ProblemFile>,
}

impl RunSummary {
    /// Fold one file report into the totals.
    pub fn absorb(&mut self, report: FileReport) {
        if report.manifest_failed {
            self.manifest_failures += 1;
        }
        match report.outcome {
            FileOutcome::Archived(entry) => {
                self.processed += 1;
                self.archived += 1;
                self.bytes_in += entry.original_len;
                self.bytes_out += entry.compressed_len;
            }
            FileOutcome::Reused(_) => {
                self.processed += 1;
                self.archived += 1;
                self.reused += 1;
            }
            FileOutcome::Skipped => {
                self.processed += 1;
                self.skipped += 1;
            }
            FileOutcome::Planned(_) => {
                self.processed += 1;
                self.planned += 1;
            }
            FileOutcome::Rejected(reason) => {
                self.processed += 1;
                *self.rejected.entry(reason.label()).or_default() += 1;
                self.problems.push(ProblemFile {
                    path: report.path,
                    outcome: "rejected",
                    reason: reason.label(),
                    detail: reason.to_string(),
                });
            }
            FileOutcome::Failed { kind, detail } => {
                self.processed += 1;
                *self.failed.entry(kind.label()).or_default() += 1;
                self.problems.push(ProblemFile {
                    path: report.path,
                    outcome: "failed",
                    reason: kind.label(),
                    detail,
                });
            }
        }
    }

    /// Total rejected files.
    #[must_use]
    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }

    /// Total failed files.
    #[must_use]
    pub fn failed_total(&self) -> u64 {
        self.failed.values().sum()
    }

    /// Order problem files by path for stable output.
    pub fn sort_problems(&mut self) {
        self.problems.sort_by(|left, right| left.path.cmp(&right.path));
    }
}
