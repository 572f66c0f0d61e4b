//! Durable progress manifest.
//!
//! # Design
//! - State is a JSON snapshot plus an append-only JSON Lines journal; `record`
//!   appends one upsert per line, `flush` folds the journal into a new snapshot.
//! - Writes are serialized by the journal mutex; lookups read an `RwLock`ed map.
//! - Damaged state degrades to "not yet processed" with a warning, never an abort.
//! - Records are keyed by source path; a lookup only hits when the recorded
//!   last-modified timestamp matches, so changed files are reprocessed.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{ArchiveError, ArchiveResult};
use crate::model::{ManifestKey, ManifestRecord};
use crate::writer::STAGING_SUFFIX;

/// Snapshot file name inside the manifest directory.
pub const SNAPSHOT_FILE: &str = "manifest.json";
/// Journal file name inside the manifest directory.
pub const JOURNAL_FILE: &str = "manifest.journal";

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    updated_at: DateTime<Utc>,
    records: Vec<ManifestRecord>,
}

/// Resumable record of per-file outcomes.
#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    records: RwLock<HashMap<PathBuf, ManifestRecord>>,
    journal: Mutex<Option<File>>,
}

impl Manifest {
    /// Open the manifest for writing, creating the directory and journal as needed.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory or journal cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| ArchiveError::io("manifest.create", &dir, err))?;
        let records = read_state(&dir);
        let journal_path = dir.join(JOURNAL_FILE);
        let mut journal = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&journal_path)
            .map_err(|err| ArchiveError::io("journal.open", &journal_path, err))?;
        // A torn final line must not swallow the next append.
        if !ends_with_newline(&journal_path)
            .map_err(|err| ArchiveError::io("journal.inspect", &journal_path, err))?
        {
            journal
                .write_all(b"\n")
                .map_err(|err| ArchiveError::io("journal.append", &journal_path, err))?;
        }
        debug!(dir = %dir.display(), records = records.len(), "manifest opened");
        Ok(Self {
            dir,
            records: RwLock::new(records),
            journal: Mutex::new(Some(journal)),
        })
    }

    /// Load existing state without creating anything on disk.
    #[must_use]
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let records = read_state(&dir);
        Self {
            dir,
            records: RwLock::new(records),
            journal: Mutex::new(None),
        }
    }

    /// Directory holding the snapshot and journal.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record for exactly this version of a source file.
    #[must_use]
    pub fn lookup(&self, key: &ManifestKey) -> Option<ManifestRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.path)
            .filter(|record| record.modified == key.modified)
            .cloned()
    }

    /// Upsert a record, appending it to the journal before it becomes visible.
    ///
    /// # Errors
    ///
    /// Returns an error when the manifest is read-only or the journal write fails.
    pub fn record(&self, record: ManifestRecord) -> ArchiveResult<()> {
        let mut journal = self.lock_journal();
        let journal_path = self.dir.join(JOURNAL_FILE);
        let file = journal
            .as_mut()
            .ok_or_else(|| ArchiveError::ManifestReadOnly {
                path: self.dir.clone(),
            })?;
        let mut line = serde_json::to_vec(&record)
            .map_err(|err| ArchiveError::json("journal.serialize", &journal_path, err))?;
        line.push(b'\n');
        file.write_all(&line)
            .map_err(|err| ArchiveError::io("journal.append", &journal_path, err))?;
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.source.clone(), record);
        Ok(())
    }

    /// Fold the journal into a fresh snapshot and truncate the journal.
    ///
    /// # Errors
    ///
    /// Returns an error when the manifest is read-only or the snapshot cannot be
    /// written; the journal is left intact in that case.
    pub fn flush(&self) -> ArchiveResult<()> {
        let mut journal = self.lock_journal();
        let file = journal
            .as_mut()
            .ok_or_else(|| ArchiveError::ManifestReadOnly {
                path: self.dir.clone(),
            })?;

        let snapshot_path = self.dir.join(SNAPSHOT_FILE);
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            records: self.records(),
        };
        let encoded = serde_json::to_vec(&snapshot)
            .map_err(|err| ArchiveError::json("snapshot.serialize", &snapshot_path, err))?;

        let staged = self.dir.join(format!(
            "{SNAPSHOT_FILE}.{}{STAGING_SUFFIX}",
            Uuid::new_v4().simple()
        ));
        if let Err(err) = write_synced(&staged, &encoded) {
            let _ = fs::remove_file(&staged);
            return Err(err);
        }
        if let Err(err) = fs::rename(&staged, &snapshot_path) {
            let _ = fs::remove_file(&staged);
            return Err(ArchiveError::io("snapshot.publish", &snapshot_path, err));
        }

        let journal_path = self.dir.join(JOURNAL_FILE);
        file.set_len(0)
            .and_then(|()| file.sync_all())
            .map_err(|err| ArchiveError::io("journal.truncate", &journal_path, err))?;
        debug!(
            dir = %self.dir.display(),
            records = snapshot.records.len(),
            "manifest flushed"
        );
        Ok(())
    }

    /// Number of tracked source files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no source file has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records ordered by source path.
    #[must_use]
    pub fn records(&self) -> Vec<ManifestRecord> {
        let mut records: Vec<ManifestRecord> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by(|left, right| left.source.cmp(&right.source));
        records
    }

    fn lock_journal(&self) -> MutexGuard<'_, Option<File>> {
        match self.journal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("manifest journal mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> ArchiveResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| ArchiveError::io("snapshot.create", path, err))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|err| ArchiveError::io("snapshot.write", path, err))
}

fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn read_state(dir: &Path) -> HashMap<PathBuf, ManifestRecord> {
    let mut records = HashMap::new();
    let snapshot_path = dir.join(SNAPSHOT_FILE);
    match load_snapshot(&snapshot_path) {
        Ok(Some(snapshot)) => {
            for record in snapshot.records {
                records.insert(record.source.clone(), record);
            }
        }
        Ok(None) => {}
        Err(err) => {
            warn!(
                path = %snapshot_path.display(),
                error = %err.detail(),
                "manifest snapshot unusable; starting empty"
            );
        }
    }
    replay_journal(&dir.join(JOURNAL_FILE), &mut records);
    records
}

fn load_snapshot(path: &Path) -> ArchiveResult<Option<Snapshot>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ArchiveError::io("snapshot.read", path, err)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|err| ArchiveError::json("snapshot.parse", path, err))
}

fn replay_journal(path: &Path, records: &mut HashMap<PathBuf, ManifestRecord>) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "manifest journal unreadable; ignoring");
            return;
        }
    };
    let mut replayed = 0_usize;
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "manifest journal read stopped");
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<ManifestRecord>(&line) {
            Ok(record) => {
                records.insert(record.source.clone(), record);
                replayed += 1;
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %err,
                    "skipping corrupted manifest journal line"
                );
            }
        }
    }
    if replayed > 0 {
        debug!(path = %path.display(), replayed, "manifest journal replayed");
    }
}
