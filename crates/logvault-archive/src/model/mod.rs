//! Domain models for the archive pipeline.
//!
//! # Design
//! - Keep per-file types small and cloneable; they cross the blocking pool boundary.
//! - Avoid embedding IO handles; components open sources themselves.
//! - Serialized forms use snake_case tags so manifest files stay readable.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One candidate file discovered under the input root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    /// Absolute source path.
    pub path: PathBuf,
    /// Raw byte length at discovery time.
    pub len: u64,
    /// Last-modified timestamp used for change detection.
    pub modified: DateTime<Utc>,
}

impl InputRecord {
    /// Manifest key identifying this version of the file.
    #[must_use]
    pub fn key(&self) -> ManifestKey {
        ManifestKey {
            path: self.path.clone(),
            modified: self.modified,
        }
    }
}

/// Why a file was excluded from the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// The log contains a disconnected-participant marker.
    OfflinePlayer {
        /// Marker that matched.
        marker: String,
    },
    /// The file could not be opened or read.
    Unreadable,
    /// No calendar-valid date could be derived.
    Undated,
}

impl RejectReason {
    /// Stable label used in summaries and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OfflinePlayer { .. } => "offline_player",
            Self::Unreadable => "unreadable",
            Self::Undated => "undated",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OfflinePlayer { marker } => write!(f, "offline player marker {marker:?}"),
            Self::Unreadable => f.write_str("unreadable"),
            Self::Undated => f.write_str("no valid date"),
        }
    }
}

/// Why an accepted file could not be archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Compression, staging or publishing failed after all retries.
    WriteFailure,
    /// Another source already owns the same archive entry.
    NameCollision,
    /// The source changed while it was being archived.
    SourceChanged,
    /// The worker panicked or was cancelled.
    Internal,
}

impl FailureKind {
    /// Stable label used in summaries and metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::WriteFailure => "write_failure",
            Self::NameCollision => "name_collision",
            Self::SourceChanged => "source_changed",
            Self::Internal => "internal",
        }
    }
}

/// Acceptance decision for one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// File may be archived.
    Accepted,
    /// File is excluded.
    Rejected(RejectReason),
}

/// Calendar date used to partition the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatePartition {
    year: u16,
    month: u8,
    day: u8,
}

impl DatePartition {
    /// Build a partition when the fields form a valid calendar date in years 1-9999.
    #[must_use]
    pub fn new(year: u32, month: u32, day: u32) -> Option<Self> {
        if !(1..=9999).contains(&year) {
            return None;
        }
        let signed_year = i32::try_from(year).ok()?;
        NaiveDate::from_ymd_opt(signed_year, month, day)?;
        Some(Self {
            year: u16::try_from(year).ok()?,
            month: u8::try_from(month).ok()?,
            day: u8::try_from(day).ok()?,
        })
    }

    /// Calendar year.
    #[must_use]
    pub const fn year(self) -> u16 {
        self.year
    }

    /// Calendar month (1-12).
    #[must_use]
    pub const fn month(self) -> u8 {
        self.month
    }

    /// Day of month.
    #[must_use]
    pub const fn day(self) -> u8 {
        self.day
    }
}

impl fmt::Display for DatePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// One compressed output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Final archive path.
    pub path: PathBuf,
    /// Length of the original bytes.
    pub original_len: u64,
    /// Length of the gzip file.
    pub compressed_len: u64,
    /// Hex SHA-256 of the original bytes.
    pub sha256: String,
}

impl ArchiveEntry {
    /// Compressed size divided by original size; zero for empty sources.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.original_len == 0 {
            0.0
        } else {
            self.compressed_len as f64 / self.original_len as f64
        }
    }
}

/// Manifest identity: a specific version of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestKey {
    /// Absolute source path.
    pub path: PathBuf,
    /// Last-modified timestamp of that version.
    pub modified: DateTime<Utc>,
}

/// Terminal state persisted for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ManifestOutcome {
    /// An archive entry holds the file's bytes.
    Archived,
    /// File was excluded.
    Rejected {
        /// Exclusion reason.
        reason: RejectReason,
    },
    /// File could not be archived.
    Failed {
        /// Failure class.
        kind: FailureKind,
    },
}

impl ManifestOutcome {
    /// Stable label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::Rejected { .. } => "rejected",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Durable per-file progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Absolute source path.
    pub source: PathBuf,
    /// Last-modified timestamp of the processed version.
    pub modified: DateTime<Utc>,
    /// Terminal outcome.
    pub outcome: ManifestOutcome,
    /// When processing finished.
    pub completed_at: DateTime<Utc>,
    /// Archive path for archived files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
    /// Original byte length for archived files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_len: Option<u64>,
    /// Hex SHA-256 for archived files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ManifestRecord {
    /// Record for a file that now has an archive entry.
    #[must_use]
    pub fn archived(key: &ManifestKey, entry: &ArchiveEntry) -> Self {
        Self {
            source: key.path.clone(),
            modified: key.modified,
            outcome: ManifestOutcome::Archived,
            completed_at: Utc::now(),
            archive_path: Some(entry.path.clone()),
            original_len: Some(entry.original_len),
            sha256: Some(entry.sha256.clone()),
            detail: None,
        }
    }

    /// Record for an excluded file.
    #[must_use]
    pub fn rejected(key: &ManifestKey, reason: RejectReason) -> Self {
        let detail = Some(reason.to_string());
        Self {
            source: key.path.clone(),
            modified: key.modified,
            outcome: ManifestOutcome::Rejected { reason },
            completed_at: Utc::now(),
            archive_path: None,
            original_len: None,
            sha256: None,
            detail,
        }
    }

    /// Record for a file whose archival failed.
    #[must_use]
    pub fn failed(key: &ManifestKey, kind: FailureKind, detail: String) -> Self {
        Self {
            source: key.path.clone(),
            modified: key.modified,
            outcome: ManifestOutcome::Failed { kind },
            completed_at: Utc::now(),
            archive_path: None,
            original_len: None,
            sha256: None,
            detail: Some(detail),
        }
    }

    /// Key this record was written under.
    #[must_use]
    pub fn key(&self) -> ManifestKey {
        ManifestKey {
            path: self.source.clone(),
            modified: self.modified,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_reject_invalid_calendar_dates() {
        assert!(DatePartition::new(2019, 7, 4).is_some());
        assert!(DatePartition::new(2020, 2, 29).is_some());
        assert!(DatePartition::new(2019, 2, 29).is_none());
        assert!(DatePartition::new(2019, 13, 1).is_none());
        assert!(DatePartition::new(2019, 2, 30).is_none());
        assert!(DatePartition::new(0, 1, 1).is_none());
        assert!(DatePartition::new(10_000, 1, 1).is_none());
    }

    #[test]
    fn ratio_handles_empty_sources() {
        let mut entry = ArchiveEntry {
            path: PathBuf::from("a.json.gz"),
            original_len: 0,
            compressed_len: 20,
            sha256: String::new(),
        };
        assert!(entry.ratio().abs() < f64::EPSILON);
        entry.original_len = 40;
        assert!((entry.ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn rejected_record_serializes_tagged_reason() -> Result<(), serde_json::Error> {
        let key = ManifestKey {
            path: PathBuf::from("/logs/a.json"),
            modified: DateTime::<Utc>::UNIX_EPOCH,
        };
        let record = ManifestRecord::rejected(
            &key,
            RejectReason::OfflinePlayer {
                marker: "BYE".to_string(),
            },
        );
        let value = serde_json::to_value(&record)?;
        assert_eq!(value["outcome"]["status"], "rejected");
        assert_eq!(value["outcome"]["reason"]["kind"], "offline_player");
        assert_eq!(value["outcome"]["reason"]["marker"], "BYE");
        assert!(value.get("archive_path").is_none());

        let parsed: ManifestRecord = serde_json::from_value(value)?;
        assert_eq!(parsed, record);
        assert_eq!(parsed.key(), key);
        Ok(())
    }
}
