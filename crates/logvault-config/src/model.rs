//! Typed archive policy and the override layer applied on top of it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_DATE_SCAN_BYTES, DEFAULT_MAX_RETRIES,
    DEFAULT_OFFLINE_MARKER, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_SCAN_CHUNK_BYTES, MANIFEST_DIR_NAME,
    default_workers,
};

/// Complete set of tunables for one archive run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchivePolicy {
    /// Root of the match-log tree to archive.
    pub input_root: PathBuf,
    /// Root of the date-partitioned archive.
    pub output_root: PathBuf,
    /// Directory holding manifest state; defaults to `<output_root>/.logvault`.
    pub manifest_dir: Option<PathBuf>,
    /// Number of files processed concurrently.
    pub workers: usize,
    /// Extra attempts for a failed archive write within one run.
    pub max_retries: u32,
    /// Base backoff between write attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Gzip compression level (0-9).
    pub compression_level: u32,
    /// Literal byte strings marking a match with a disconnected participant.
    pub offline_markers: Vec<String>,
    /// Glob patterns (relative to the input root) restricting candidate files.
    pub include: Vec<String>,
    /// Bytes of content scanned for an embedded date.
    pub date_scan_bytes: usize,
    /// Chunk size for the marker scan.
    pub scan_chunk_bytes: usize,
    /// Decompress staged archives and compare digests before publishing.
    pub verify_after_write: bool,
    /// Classify and date files without writing archives or manifest records.
    pub dry_run: bool,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            input_root: PathBuf::new(),
            output_root: PathBuf::new(),
            manifest_dir: None,
            workers: default_workers(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            offline_markers: vec![DEFAULT_OFFLINE_MARKER.to_string()],
            include: Vec::new(),
            date_scan_bytes: DEFAULT_DATE_SCAN_BYTES,
            scan_chunk_bytes: DEFAULT_SCAN_CHUNK_BYTES,
            verify_after_write: true,
            dry_run: false,
        }
    }
}

impl ArchivePolicy {
    /// Build a default policy for the given roots.
    #[must_use]
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            ..Self::default()
        }
    }

    /// Directory where the manifest snapshot and journal live.
    #[must_use]
    pub fn resolved_manifest_dir(&self) -> PathBuf {
        self.manifest_dir
            .clone()
            .unwrap_or_else(|| self.output_root.join(MANIFEST_DIR_NAME))
    }

    /// Length of the longest configured offline marker in bytes.
    #[must_use]
    pub fn longest_marker(&self) -> usize {
        self.offline_markers
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
    }

    /// Apply a layer of overrides, leaving unset fields untouched.
    pub fn apply(&mut self, overrides: PolicyOverrides) {
        let PolicyOverrides {
            input_root,
            output_root,
            manifest_dir,
            workers,
            max_retries,
            compression_level,
            offline_markers,
            include,
            date_scan_bytes,
            verify_after_write,
            dry_run,
        } = overrides;

        if let Some(value) = input_root {
            self.input_root = value;
        }
        if let Some(value) = output_root {
            self.output_root = value;
        }
        if manifest_dir.is_some() {
            self.manifest_dir = manifest_dir;
        }
        if let Some(value) = workers {
            self.workers = value;
        }
        if let Some(value) = max_retries {
            self.max_retries = value;
        }
        if let Some(value) = compression_level {
            self.compression_level = value;
        }
        if !offline_markers.is_empty() {
            self.offline_markers = offline_markers;
        }
        if !include.is_empty() {
            self.include = include;
        }
        if let Some(value) = date_scan_bytes {
            self.date_scan_bytes = value;
        }
        if let Some(value) = verify_after_write {
            self.verify_after_write = value;
        }
        if let Some(value) = dry_run {
            self.dry_run = value;
        }
    }

    /// Whether `path` lies under the manifest or output directories.
    #[must_use]
    pub fn is_internal_path(&self, path: &Path) -> bool {
        path.starts_with(self.resolved_manifest_dir()) || path.starts_with(&self.output_root)
    }
}

/// Optional values layered over a policy (CLI flags, environment).
///
/// Empty vectors leave the underlying list untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    /// Replacement input root.
    pub input_root: Option<PathBuf>,
    /// Replacement output root.
    pub output_root: Option<PathBuf>,
    /// Replacement manifest directory.
    pub manifest_dir: Option<PathBuf>,
    /// Replacement worker count.
    pub workers: Option<usize>,
    /// Replacement retry budget.
    pub max_retries: Option<u32>,
    /// Replacement gzip level.
    pub compression_level: Option<u32>,
    /// Replacement offline markers.
    pub offline_markers: Vec<String>,
    /// Replacement include globs.
    pub include: Vec<String>,
    /// Replacement date scan window.
    pub date_scan_bytes: Option<usize>,
    /// Replacement verification toggle.
    pub verify_after_write: Option<bool>,
    /// Replacement dry-run toggle.
    pub dry_run: Option<bool>,
}
