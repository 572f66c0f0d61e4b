//! Marker-based acceptance predicate over raw file bytes.
//!
//! # Design
//! - Treat content as opaque bytes; markers are literal byte strings.
//! - Scan in fixed chunks and carry `longest_marker - 1` bytes between them so a
//!   marker split across a chunk boundary is still found.
//! - Never fail: read errors turn into an `Unreadable` rejection.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use regex::bytes::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};
use crate::model::{Classification, RejectReason};

/// Rejects logs containing any configured offline-player marker.
#[derive(Debug, Clone)]
pub struct Classifier {
    pattern: Regex,
    overlap: usize,
    chunk_bytes: usize,
}

impl Classifier {
    /// Compile the marker set.
    ///
    /// # Errors
    ///
    /// Returns an error when no markers are supplied, a marker is empty, or the
    /// compiled pattern exceeds the regex size limit.
    pub fn new(markers: &[String], chunk_bytes: usize) -> ArchiveResult<Self> {
        if markers.is_empty() || markers.iter().any(String::is_empty) {
            return Err(logvault_config::ConfigError::InvalidField {
                field: "offline_markers",
                reason: "required",
                value: None,
            }
            .into());
        }
        let longest = markers.iter().map(String::len).max().unwrap_or(1);
        let alternation = markers
            .iter()
            .map(|marker| regex::escape(marker))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&alternation)
            .unicode(false)
            .build()
            .map_err(|source| ArchiveError::Pattern { source })?;
        Ok(Self {
            pattern,
            overlap: longest.saturating_sub(1),
            chunk_bytes: chunk_bytes.max(longest),
        })
    }

    /// Classify the file at `path`, rejecting it as unreadable if it cannot be opened.
    #[must_use]
    pub fn classify_path(&self, path: &Path) -> Classification {
        match File::open(path) {
            Ok(file) => self.classify(file),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "source open failed");
                Classification::Rejected(RejectReason::Unreadable)
            }
        }
    }

    /// Scan a reader to completion or until a marker is found.
    pub fn classify<R: Read>(&self, mut reader: R) -> Classification {
        let mut window = Vec::with_capacity(self.overlap + self.chunk_bytes);
        let mut chunk = vec![0_u8; self.chunk_bytes];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => return Classification::Accepted,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(error = %err, "source read failed");
                    return Classification::Rejected(RejectReason::Unreadable);
                }
            };
            window.extend_from_slice(&chunk[..read]);
            if let Some(found) = self.pattern.find(&window) {
                let marker = String::from_utf8_lossy(found.as_bytes()).into_owned();
                return Classification::Rejected(RejectReason::OfflinePlayer { marker });
            }
            let keep = self.overlap.min(window.len());
            window.drain(..window.len() - keep);
        }
    }
}
