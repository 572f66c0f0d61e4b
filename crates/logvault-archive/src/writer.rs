//! Atomic gzip archive writer.
//!
//! # Design
//! - Byte-opaque: sources are streamed through the encoder and hashed while copied.
//! - Stage privately (`.<name>.gz.<uuid>.lvtmp` beside the target), fsync, then
//!   rename once; any failure removes the staged file.
//! - An existing target is trusted only after its decompressed digest matches.
//! - `ArchiveSink` is the seam the orchestrator writes through.

use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{ArchiveError, ArchiveResult};
use crate::model::{ArchiveEntry, DatePartition};
use crate::partition::partition_dir;

/// Suffix carried by staged archive files until they are published.
pub const STAGING_SUFFIX: &str = ".lvtmp";

/// One accepted, dated source to be archived.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest<'a> {
    /// Source file.
    pub source: &'a Path,
    /// Partition the entry belongs to.
    pub partition: DatePartition,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new archive entry was published.
    Written(ArchiveEntry),
    /// An identical entry already existed and was left untouched.
    Reused(ArchiveEntry),
}

impl WriteOutcome {
    /// Entry describing the published archive.
    #[must_use]
    pub const fn entry(&self) -> &ArchiveEntry {
        match self {
            Self::Written(entry) | Self::Reused(entry) => entry,
        }
    }
}

/// Destination for accepted files.
pub trait ArchiveSink: Send + Sync {
    /// Produce (or confirm) the archive entry for one source.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry could not be published; nothing partial
    /// may remain visible under the final name.
    fn write_entry(&self, request: &WriteRequest<'_>) -> ArchiveResult<WriteOutcome>;

    /// Final archive path the request publishes to.
    ///
    /// # Errors
    ///
    /// Returns an error when the source has no usable file name.
    fn target_path(&self, request: &WriteRequest<'_>) -> ArchiveResult<PathBuf>;
}

/// Filesystem sink writing gzip entries under `<output_root>/<yyyy>/<mm>/<dd>/`.
#[derive(Debug, Clone)]
pub struct GzipArchiveWriter {
    output_root: PathBuf,
    level: Compression,
    verify: bool,
}

impl GzipArchiveWriter {
    /// Writer publishing under `output_root` at the given gzip level.
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>, level: u32, verify: bool) -> Self {
        Self {
            output_root: output_root.into(),
            level: Compression::new(level.min(9)),
            verify,
        }
    }

    fn stage(&self, source: &Path, staged: &Path) -> ArchiveResult<Digested> {
        let input =
            File::open(source).map_err(|err| ArchiveError::io("source.open", source, err))?;
        let output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(staged)
            .map_err(|err| ArchiveError::io("staging.create", staged, err))?;

        let mut reader = HashingReader::new(input);
        let mut encoder = GzEncoder::new(BufWriter::new(output), self.level);
        io::copy(&mut reader, &mut encoder)
            .map_err(|err| ArchiveError::io("staging.compress", staged, err))?;
        let buffered = encoder
            .finish()
            .map_err(|err| ArchiveError::io("staging.finish", staged, err))?;
        let file = buffered
            .into_inner()
            .map_err(|err| ArchiveError::io("staging.flush", staged, err.into_error()))?;
        file.sync_all()
            .map_err(|err| ArchiveError::io("staging.sync", staged, err))?;
        Ok(reader.finish())
    }
}

impl ArchiveSink for GzipArchiveWriter {
    fn write_entry(&self, request: &WriteRequest<'_>) -> ArchiveResult<WriteOutcome> {
        let target = self.target_path(request)?;
        let dir = target
            .parent()
            .map_or_else(|| self.output_root.clone(), Path::to_path_buf);
        fs::create_dir_all(&dir).map_err(|err| ArchiveError::io("partition.create", &dir, err))?;

        if target.is_file() {
            let source = digest_file(request.source)?;
            match digest_gzip(&target) {
                Ok(existing) if existing == source => {
                    debug!(target = %target.display(), "existing archive matches source");
                    return Ok(WriteOutcome::Reused(entry_for(&target, &source)?));
                }
                Ok(_) => {
                    warn!(
                        target = %target.display(),
                        "existing archive differs from source; replacing"
                    );
                }
                Err(err) => {
                    warn!(
                        target = %target.display(),
                        error = %err,
                        "existing archive unreadable; replacing"
                    );
                }
            }
        }

        let staged = StagedFile::new(staging_path(&dir, &target));
        let digest = self.stage(request.source, staged.path())?;
        if self.verify {
            let check = digest_gzip(staged.path())
                .map_err(|err| ArchiveError::io("staging.verify", staged.path(), err))?;
            if check.len != digest.len {
                return Err(ArchiveError::VerificationMismatch {
                    path: staged.path().to_path_buf(),
                    reason: "length",
                });
            }
            if check.sha256 != digest.sha256 {
                return Err(ArchiveError::VerificationMismatch {
                    path: staged.path().to_path_buf(),
                    reason: "sha256",
                });
            }
        }
        staged.publish(&target)?;
        sync_dir(&dir);
        Ok(WriteOutcome::Written(entry_for(&target, &digest)?))
    }

    fn target_path(&self, request: &WriteRequest<'_>) -> ArchiveResult<PathBuf> {
        let name = entry_name(request.source)?;
        Ok(partition_dir(&self.output_root, request.partition).join(name))
    }
}

/// Remove staged files abandoned by an interrupted run, returning how many were deleted.
pub fn sweep_orphans(root: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "orphan sweep skipped entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_staging_name(entry.file_name()) {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "removed orphaned staging file");
                removed += 1;
            }
            Err(err) => {
                warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "failed to remove orphaned staging file"
                );
            }
        }
    }
    removed
}

/// Length and hex SHA-256 of a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Digested {
    pub(crate) len: u64,
    pub(crate) sha256: String,
}

struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    len: u64,
}

impl<R: Read> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            len: 0,
        }
    }

    fn finish(self) -> Digested {
        Digested {
            len: self.len,
            sha256: format!("{:x}", self.hasher.finalize()),
        }
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.len += read as u64;
        Ok(read)
    }
}

fn digest_reader<R: Read>(reader: R) -> io::Result<Digested> {
    let mut hashing = HashingReader::new(reader);
    io::copy(&mut hashing, &mut io::sink())?;
    Ok(hashing.finish())
}

fn digest_file(path: &Path) -> ArchiveResult<Digested> {
    File::open(path)
        .and_then(digest_reader)
        .map_err(|err| ArchiveError::io("source.digest", path, err))
}

/// Digest of the decompressed contents of a gzip file.
pub(crate) fn digest_gzip(path: &Path) -> io::Result<Digested> {
    digest_reader(GzDecoder::new(File::open(path)?))
}

fn entry_for(target: &Path, digest: &Digested) -> ArchiveResult<ArchiveEntry> {
    let compressed_len = fs::metadata(target)
        .map_err(|err| ArchiveError::io("archive.stat", target, err))?
        .len();
    Ok(ArchiveEntry {
        path: target.to_path_buf(),
        original_len: digest.len,
        compressed_len,
        sha256: digest.sha256.clone(),
    })
}

fn entry_name(source: &Path) -> ArchiveResult<OsString> {
    let name = source
        .file_name()
        .filter(|name| !is_staging_name(name))
        .ok_or_else(|| ArchiveError::InvalidEntryName {
            path: source.to_path_buf(),
        })?;
    let mut entry = name.to_os_string();
    entry.push(".gz");
    Ok(entry)
}

fn staging_path(dir: &Path, target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(target.file_name().unwrap_or_else(|| OsStr::new("entry")));
    name.push(format!(".{}{STAGING_SUFFIX}", Uuid::new_v4().simple()));
    dir.join(name)
}

fn is_staging_name(name: &OsStr) -> bool {
    name.to_string_lossy().ends_with(STAGING_SUFFIX)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|handle| handle.sync_all()) {
        debug!(dir = %dir.display(), error = %err, "directory sync failed");
    }
}

#[cfg(not(unix))]
const fn sync_dir(_dir: &Path) {}

/// Staged file removed on drop unless published.
struct StagedFile {
    path: PathBuf,
    published: bool,
}

impl StagedFile {
    const fn new(path: PathBuf) -> Self {
        Self {
            path,
            published: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn publish(mut self, target: &Path) -> ArchiveResult<()> {
        fs::rename(&self.path, target)
            .map_err(|err| ArchiveError::io("archive.publish", target, err))?;
        self.published = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.published
            && let Err(err) = fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove staging file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::TempDir;

    fn partition() -> Result<DatePartition> {
        DatePartition::new(2019, 7, 4).ok_or_else(|| anyhow::anyhow!("invalid partition"))
    }

    fn decompress(path: &Path) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        GzDecoder::new(File::open(path)?).read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn staging_files(root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| is_staging_name(entry.file_name()))
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    #[test]
    fn written_entry_round_trips_source_bytes() -> Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("2019070419gm-00a9.json");
        let payload = br#"{"log":[["<INIT seed=\"0,0,0\"/>"]]}"#.repeat(64);
        fs::write(&source, &payload)?;
        let writer = GzipArchiveWriter::new(dir.path().join("out"), 6, true);

        let outcome = writer.write_entry(&WriteRequest {
            source: &source,
            partition: partition()?,
        })?;
        let WriteOutcome::Written(entry) = outcome else {
            anyhow::bail!("expected a fresh entry");
        };
        assert_eq!(
            entry.path,
            dir.path().join("out/2019/07/04/2019070419gm-00a9.json.gz")
        );
        assert_eq!(entry.original_len, payload.len() as u64);
        assert!(entry.compressed_len < entry.original_len);
        assert_eq!(entry.sha256, format!("{:x}", Sha256::digest(&payload)));
        assert_eq!(decompress(&entry.path)?, payload);
        assert!(staging_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn empty_sources_archive_to_valid_gzip() -> Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("empty.json");
        File::create(&source)?;
        let writer = GzipArchiveWriter::new(dir.path().join("out"), 0, true);

        let outcome = writer.write_entry(&WriteRequest {
            source: &source,
            partition: partition()?,
        })?;
        assert_eq!(outcome.entry().original_len, 0);
        assert!(decompress(&outcome.entry().path)?.is_empty());
        Ok(())
    }

    #[test]
    fn matching_existing_entry_is_reused() -> Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("a.json");
        fs::write(&source, b"same bytes")?;
        let writer = GzipArchiveWriter::new(dir.path().join("out"), 6, false);
        let request = WriteRequest {
            source: &source,
            partition: partition()?,
        };

        let first = writer.write_entry(&request)?;
        let modified = fs::metadata(&first.entry().path)?.modified()?;
        let second = writer.write_entry(&request)?;
        assert!(matches!(second, WriteOutcome::Reused(_)));
        assert_eq!(second.entry(), first.entry());
        assert_eq!(fs::metadata(&first.entry().path)?.modified()?, modified);
        Ok(())
    }

    #[test]
    fn corrupt_or_stale_entries_are_replaced() -> Result<()> {
        let dir = TempDir::new()?;
        let source = dir.path().join("a.json");
        fs::write(&source, b"fresh bytes")?;
        let writer = GzipArchiveWriter::new(dir.path().join("out"), 6, true);
        let request = WriteRequest {
            source: &source,
            partition: partition()?,
        };
        let target = writer.target_path(&request)?;
        fs::create_dir_all(target.parent().ok_or_else(|| anyhow::anyhow!("no parent"))?)?;

        fs::write(&target, b"not gzip at all")?;
        assert!(matches!(
            writer.write_entry(&request)?,
            WriteOutcome::Written(_)
        ));
        assert_eq!(decompress(&target)?, b"fresh bytes");

        let mut stale = GzEncoder::new(File::create(&target)?, Compression::default());
        stale.write_all(b"old bytes")?;
        stale.finish()?;
        assert!(matches!(
            writer.write_entry(&request)?,
            WriteOutcome::Written(_)
        ));
        assert_eq!(decompress(&target)?, b"fresh bytes");
        Ok(())
    }

    #[test]
    fn failed_write_leaves_no_staging_file_or_target() -> Result<()> {
        let dir = TempDir::new()?;
        let writer = GzipArchiveWriter::new(dir.path().join("out"), 6, true);
        let missing = dir.path().join("vanished.json");
        let request = WriteRequest {
            source: &missing,
            partition: partition()?,
        };

        let err = writer.write_entry(&request).err();
        assert!(matches!(
            err,
            Some(ArchiveError::Io {
                operation: "source.open",
                ..
            })
        ));
        assert!(!writer.target_path(&request)?.exists());
        assert!(staging_files(dir.path()).is_empty());
        Ok(())
    }

    #[test]
    fn sweep_removes_only_staging_files() -> Result<()> {
        let dir = TempDir::new()?;
        let partition_dir = dir.path().join("2019/07/04");
        fs::create_dir_all(&partition_dir)?;
        fs::write(partition_dir.join(".a.json.gz.0f3c.lvtmp"), b"partial")?;
        fs::write(partition_dir.join(".b.json.gz.77aa.lvtmp"), b"partial")?;
        fs::write(partition_dir.join("a.json.gz"), b"kept")?;

        assert_eq!(sweep_orphans(dir.path()), 2);
        assert!(partition_dir.join("a.json.gz").exists());
        assert!(staging_files(dir.path()).is_empty());
        assert_eq!(sweep_orphans(&dir.path().join("missing")), 0);
        Ok(())
    }

    #[test]
    fn staging_named_sources_are_refused() {
        assert!(entry_name(Path::new("/in/.a.json.gz.1.lvtmp")).is_err());
        assert!(entry_name(Path::new("/")).is_err());
        assert_eq!(
            entry_name(Path::new("/in/a.json")).ok(),
            Some(OsString::from("a.json.gz"))
        );
    }
}
