//! Batch orchestrator for archive runs.
//!
//! # Design
//! - Setup failures (input root, output root, policy) are the only fatal class;
//!   every per-file problem becomes a report.
//! - Per-file work runs on the blocking pool under a semaphore; the dispatch
//!   loop is the single owner of the summary.
//! - Cancellation stops dispatch only; in-flight files finish and the manifest
//!   is flushed before returning.
//! - Each archive entry path has one owning source. Owners come from earlier
//!   runs' manifest records and from claims made during this run; a second
//!   source mapping to an owned entry fails instead of replacing it.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use logvault_config::ArchivePolicy;
use logvault_config::defaults::MANIFEST_DIR_NAME;
use logvault_telemetry::Metrics;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::classify::Classifier;
use crate::date::DateResolver;
use crate::error::{ArchiveError, ArchiveResult};
use crate::manifest::Manifest;
use crate::model::{
    ArchiveEntry, Classification, DatePartition, FailureKind, InputRecord, ManifestKey, ManifestOutcome,
    ManifestRecord, RejectReason,
};
use crate::summary::{FileOutcome, FileReport, RunSummary};
use crate::writer::{
    ArchiveSink, GzipArchiveWriter, WriteOutcome, WriteRequest, digest_gzip, sweep_orphans,
};

/// Runs the archive pipeline over one input tree.
pub struct ArchiveService {
    policy: ArchivePolicy,
    metrics: Metrics,
    sink: Option<Arc<dyn ArchiveSink>>,
}

impl ArchiveService {
    /// Service writing through the default gzip sink.
    #[must_use]
    pub const fn new(policy: ArchivePolicy, metrics: Metrics) -> Self {
        Self {
            policy,
            metrics,
            sink: None,
        }
    }

    /// Replace the archive sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ArchiveSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Policy this service runs with.
    #[must_use]
    pub const fn policy(&self) -> &ArchivePolicy {
        &self.policy
    }

    /// Execute one run until every candidate is processed or `cancel` turns true.
    ///
    /// # Errors
    ///
    /// Returns an error only for invalid policies and setup failures; per-file
    /// problems are reported in the summary.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> ArchiveResult<RunSummary> {
        let started = Instant::now();
        self.policy.validate()?;
        let classifier =
            Classifier::new(&self.policy.offline_markers, self.policy.scan_chunk_bytes)?;
        let include = build_globset(&self.policy.include)?;

        let policy = self.policy.clone();
        let (layout, discovery) = tokio::task::spawn_blocking(move || {
            let layout = prepare_layout(&policy)?;
            let discovery = discover(&layout, include.as_ref())?;
            Ok::<_, ArchiveError>((layout, discovery))
        })
        .await
        .map_err(|source| ArchiveError::TaskJoin {
            operation: "setup",
            source,
        })??;

        let manifest = if self.policy.dry_run {
            Arc::new(Manifest::load(&layout.manifest_dir))
        } else {
            let dir = layout.manifest_dir.clone();
            Arc::new(
                tokio::task::spawn_blocking(move || Manifest::open(dir))
                    .await
                    .map_err(|source| ArchiveError::TaskJoin {
                        operation: "manifest.open",
                        source,
                    })??,
            )
        };
        let sink = self.sink.clone().unwrap_or_else(|| {
            Arc::new(GzipArchiveWriter::new(
                layout.output_root.clone(),
                self.policy.compression_level,
                self.policy.verify_after_write,
            ))
        });

        info!(
            input = %layout.input_root.display(),
            output = %layout.output_root.display(),
            candidates = discovery.candidates.len(),
            ignored = discovery.ignored,
            workers = self.policy.workers,
            dry_run = self.policy.dry_run,
            "archive run starting"
        );

        let mut summary = RunSummary {
            ignored: discovery.ignored,
            orphans_removed: layout.orphans_removed,
            dry_run: self.policy.dry_run,
            ..RunSummary::default()
        };
        for report in discovery.unreadable {
            self.absorb(&mut summary, report);
        }

        let context = Arc::new(FileContext {
            claims: Mutex::new(recorded_claims(&manifest)),
            classifier,
            resolver: DateResolver::new(self.policy.date_scan_bytes),
            sink,
            manifest: Arc::clone(&manifest),
            metrics: self.metrics.clone(),
            max_retries: self.policy.max_retries,
            backoff: Duration::from_millis(self.policy.retry_backoff_ms),
            dry_run: self.policy.dry_run,
        });
        let semaphore = Arc::new(Semaphore::new(self.policy.workers));
        let mut tasks = JoinSet::new();

        for record in discovery.candidates {
            let Some(permit) = acquire(&semaphore, &mut cancel).await else {
                summary.interrupted = true;
                warn!("cancellation requested; waiting for in-flight files");
                break;
            };
            spawn_file(&mut tasks, Arc::clone(&context), record, permit);
            while let Some(joined) = tasks.try_join_next() {
                self.absorb(&mut summary, joined_report(joined));
            }
        }
        while let Some(joined) = tasks.join_next().await {
            self.absorb(&mut summary, joined_report(joined));
        }

        if !self.policy.dry_run {
            let flushed = tokio::task::spawn_blocking(move || manifest.flush())
                .await
                .map_err(|source| ArchiveError::TaskJoin {
                    operation: "manifest.flush",
                    source,
                })
                .and_then(|result| result);
            if let Err(err) = flushed {
                warn!(error = %err.detail(), "manifest flush failed; journal retained");
                self.metrics.inc_manifest_failure();
                summary.manifest_failures += 1;
            }
        }

        summary.sort_problems();
        summary.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            archived = summary.archived,
            reused = summary.reused,
            skipped = summary.skipped,
            rejected = summary.rejected_total(),
            failed = summary.failed_total(),
            interrupted = summary.interrupted,
            duration_ms = summary.duration_ms,
            "archive run finished"
        );
        Ok(summary)
    }

    fn absorb(&self, summary: &mut RunSummary, report: FileReport) {
        self.metrics.inc_file(report.outcome.label());
        if let FileOutcome::Archived(entry) = &report.outcome {
            self.metrics.add_bytes(entry.original_len, entry.compressed_len);
        }
        summary.absorb(report);
    }
}

/// Resolved absolute locations for one run.
#[derive(Debug, Clone)]
struct RunLayout {
    input_root: PathBuf,
    output_root: PathBuf,
    manifest_dir: PathBuf,
    orphans_removed: u64,
}

fn prepare_layout(policy: &ArchivePolicy) -> ArchiveResult<RunLayout> {
    let input = &policy.input_root;
    match fs::metadata(input) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(ArchiveError::InputRootNotDirectory {
                path: input.clone(),
            });
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(ArchiveError::InputRootMissing {
                path: input.clone(),
            });
        }
        Err(err) => return Err(ArchiveError::io("input.stat", input, err)),
    }
    let input_root = input
        .canonicalize()
        .map_err(|err| ArchiveError::io("input.canonicalize", input, err))?;

    if !policy.dry_run {
        probe_output(&policy.output_root)?;
    }
    let output_root = resolve_path(&policy.output_root)?;
    let manifest_dir = match &policy.manifest_dir {
        Some(dir) => resolve_path(dir)?,
        None => output_root.join(MANIFEST_DIR_NAME),
    };

    let mut orphans_removed = 0;
    if !policy.dry_run {
        orphans_removed += sweep_orphans(&output_root) as u64;
        if manifest_dir.is_dir() && !manifest_dir.starts_with(&output_root) {
            orphans_removed += sweep_orphans(&manifest_dir) as u64;
        }
        if orphans_removed > 0 {
            info!(orphans_removed, "removed orphaned staging files");
        }
    }

    Ok(RunLayout {
        input_root,
        output_root,
        manifest_dir,
        orphans_removed,
    })
}

fn probe_output(output: &Path) -> ArchiveResult<()> {
    let unwritable = |source| ArchiveError::OutputRootUnwritable {
        path: output.to_path_buf(),
        source,
    };
    fs::create_dir_all(output).map_err(unwritable)?;
    let probe = output.join(format!(".logvault-probe-{}", Uuid::new_v4().simple()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .map_err(unwritable)?;
    fs::remove_file(&probe).map_err(unwritable)
}

fn resolve_path(path: &Path) -> ArchiveResult<PathBuf> {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .map_err(|err| ArchiveError::io("path.resolve", path, err))
}

/// Candidates found under the input root.
#[derive(Debug, Default)]
struct Discovery {
    candidates: Vec<InputRecord>,
    ignored: u64,
    unreadable: Vec<FileReport>,
}

fn discover(layout: &RunLayout, include: Option<&GlobSet>) -> ArchiveResult<Discovery> {
    let mut discovery = Discovery::default();
    let walker = WalkDir::new(&layout.input_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.path().starts_with(&layout.output_root)
                    || entry.path().starts_with(&layout.manifest_dir))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => {
                return Err(ArchiveError::walkdir("input.walk", &layout.input_root, err));
            }
            Err(err) => {
                let path = err
                    .path()
                    .map_or_else(|| layout.input_root.clone(), Path::to_path_buf);
                warn!(path = %path.display(), error = %err, "unreadable directory entry");
                discovery.unreadable.push(FileReport::new(
                    path,
                    FileOutcome::Rejected(RejectReason::Unreadable),
                ));
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            debug!(path = %entry.path().display(), "ignoring non-regular file");
            discovery.ignored += 1;
            continue;
        }
        if let Some(globs) = include {
            let relative = entry
                .path()
                .strip_prefix(&layout.input_root)
                .unwrap_or_else(|_| entry.path());
            if !globs.is_match(relative) {
                discovery.ignored += 1;
                continue;
            }
        }
        let stat = entry
            .metadata()
            .map_err(|err| err.to_string())
            .and_then(|metadata| {
                metadata
                    .modified()
                    .map(|modified| (metadata.len(), DateTime::<Utc>::from(modified)))
                    .map_err(|err| err.to_string())
            });
        match stat {
            Ok((len, modified)) => discovery.candidates.push(InputRecord {
                path: entry.into_path(),
                len,
                modified,
            }),
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "source stat failed");
                discovery.unreadable.push(FileReport::new(
                    entry.into_path(),
                    FileOutcome::Rejected(RejectReason::Unreadable),
                ));
            }
        }
    }
    discovery
        .candidates
        .sort_by(|left, right| left.path.cmp(&right.path));
    Ok(discovery)
}

fn build_globset(patterns: &[String]) -> ArchiveResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|source_err| ArchiveError::glob("include", pattern.clone(), source_err))?,
        );
    }
    Ok(Some(builder.build().map_err(|source_err| {
        ArchiveError::glob("include", "<set>".to_string(), source_err)
    })?))
}

async fn acquire(
    semaphore: &Arc<Semaphore>,
    cancel: &mut watch::Receiver<bool>,
) -> Option<OwnedSemaphorePermit> {
    loop {
        if *cancel.borrow_and_update() {
            return None;
        }
        tokio::select! {
            permit = Arc::clone(semaphore).acquire_owned() => return permit.ok(),
            changed = cancel.changed() => {
                if changed.is_err() {
                    return Arc::clone(semaphore).acquire_owned().await.ok();
                }
            }
        }
    }
}

fn spawn_file(
    tasks: &mut JoinSet<FileReport>,
    context: Arc<FileContext>,
    record: InputRecord,
    permit: OwnedSemaphorePermit,
) {
    context.metrics.inflight_started();
    tasks.spawn(async move {
        let _permit = permit;
        let key = record.key();
        let worker = Arc::clone(&context);
        let report = match tokio::task::spawn_blocking(move || worker.process(&record)).await {
            Ok(report) => report,
            Err(err) => context.internal_failure(&key, &err),
        };
        context.metrics.inflight_finished();
        report
    });
}

fn joined_report(joined: Result<FileReport, JoinError>) -> FileReport {
    joined.unwrap_or_else(|err| {
        error!(error = %err, "archive task aborted");
        FileReport::new(
            PathBuf::new(),
            FileOutcome::Failed {
                kind: FailureKind::Internal,
                detail: err.to_string(),
            },
        )
    })
}

/// Current owner of an archive entry path.
#[derive(Debug, Clone)]
struct Claim {
    source: PathBuf,
    /// Taken from an earlier run's manifest rather than claimed in this run.
    recorded: bool,
}

fn recorded_claims(manifest: &Manifest) -> HashMap<PathBuf, Claim> {
    manifest
        .records()
        .into_iter()
        .filter(|record| record.outcome == ManifestOutcome::Archived)
        .filter_map(|record| {
            let target = record.archive_path?;
            Some((
                target,
                Claim {
                    source: record.source,
                    recorded: true,
                },
            ))
        })
        .collect()
}

/// Difference between a source's discovered state and its state after archiving.
fn source_change(record: &InputRecord, entry: &ArchiveEntry) -> Option<String> {
    if entry.original_len != record.len {
        return Some(format!(
            "source length changed from {} to {} bytes while archiving",
            record.len, entry.original_len
        ));
    }
    let current = fs::metadata(&record.path).and_then(|metadata| {
        metadata
            .modified()
            .map(|modified| (metadata.len(), DateTime::<Utc>::from(modified)))
    });
    match current {
        Ok((len, modified)) if len == record.len && modified == record.modified => None,
        Ok(_) => Some("source modified while archiving".to_string()),
        Err(err) => Some(format!("source stat after archiving failed: {err}")),
    }
}

/// Shared state for per-file work.
struct FileContext {
    claims: Mutex<HashMap<PathBuf, Claim>>,
    classifier: Classifier,
    resolver: DateResolver,
    sink: Arc<dyn ArchiveSink>,
    manifest: Arc<Manifest>,
    metrics: Metrics,
    max_retries: u32,
    backoff: Duration,
    dry_run: bool,
}

impl FileContext {
    fn process(&self, record: &InputRecord) -> FileReport {
        let key = record.key();
        if self.already_archived(&key) {
            debug!(path = %record.path.display(), "unchanged since last archive; skipping");
            return FileReport::new(record.path.clone(), FileOutcome::Skipped);
        }

        if let Classification::Rejected(reason) = self.classifier.classify_path(&record.path) {
            return self.reject(&key, reason);
        }
        let partition = match self.resolver.resolve_path(&record.path) {
            Ok(Some(partition)) => partition,
            Ok(None) => return self.reject(&key, RejectReason::Undated),
            Err(err) => {
                debug!(path = %record.path.display(), error = %err, "date scan failed");
                return self.reject(&key, RejectReason::Unreadable);
            }
        };
        if self.dry_run {
            debug!(path = %record.path.display(), %partition, "would archive");
            return FileReport::new(record.path.clone(), FileOutcome::Planned(partition));
        }
        self.archive(record, &key, partition)
    }

    fn archive(
        &self,
        record: &InputRecord,
        key: &ManifestKey,
        partition: DatePartition,
    ) -> FileReport {
        let request = WriteRequest {
            source: &record.path,
            partition,
        };
        let target = match self.sink.target_path(&request) {
            Ok(target) => target,
            Err(err) => {
                let detail = err.detail();
                error!(path = %record.path.display(), error = %detail, "archive target invalid");
                return self.finish_failed(key, FailureKind::WriteFailure, detail);
            }
        };
        if let Err(owner) = self.claim(&target, &record.path) {
            error!(
                path = %record.path.display(),
                archive = %target.display(),
                owner = %owner.display(),
                "archive entry already belongs to another source"
            );
            let detail = format!(
                "{} is already archived from {}",
                target.display(),
                owner.display()
            );
            return self.finish_failed(key, FailureKind::NameCollision, detail);
        }

        match self.write_with_retry(&request) {
            Ok(written) => {
                let entry = written.entry().clone();
                if let Some(detail) = source_change(record, &entry) {
                    warn!(
                        path = %record.path.display(),
                        reason = %detail,
                        "source changed during archive"
                    );
                    if let WriteOutcome::Written(published) = &written
                        && let Err(err) = fs::remove_file(&published.path)
                    {
                        warn!(
                            archive = %published.path.display(),
                            error = %err,
                            "failed to withdraw archive of changed source"
                        );
                    }
                    return self.finish_failed(key, FailureKind::SourceChanged, detail);
                }
                debug!(
                    path = %record.path.display(),
                    archive = %entry.path.display(),
                    ratio = entry.ratio(),
                    "archived"
                );
                let manifest_failed = !self.persist(ManifestRecord::archived(key, &entry));
                let outcome = match written {
                    WriteOutcome::Written(entry) => FileOutcome::Archived(entry),
                    WriteOutcome::Reused(entry) => FileOutcome::Reused(entry),
                };
                FileReport {
                    path: record.path.clone(),
                    outcome,
                    manifest_failed,
                }
            }
            Err(err) => {
                let detail = err.detail();
                error!(path = %record.path.display(), error = %detail, "archive write failed");
                self.finish_failed(key, FailureKind::WriteFailure, detail)
            }
        }
    }

    /// Whether this exact source version has an intact archive entry.
    fn already_archived(&self, key: &ManifestKey) -> bool {
        let Some(previous) = self.manifest.lookup(key) else {
            return false;
        };
        let (ManifestOutcome::Archived, Some(path), Some(len), Some(sha256)) = (
            &previous.outcome,
            previous.archive_path.as_deref(),
            previous.original_len,
            previous.sha256.as_deref(),
        ) else {
            return false;
        };
        match digest_gzip(path) {
            Ok(found) if found.len == len && found.sha256 == sha256 => true,
            Ok(_) => {
                warn!(archive = %path.display(), "archive no longer matches its record");
                false
            }
            Err(err) => {
                debug!(archive = %path.display(), error = %err, "recorded archive unreadable");
                false
            }
        }
    }

    /// Take ownership of `target` for `source`, returning the current owner on conflict.
    fn claim(&self, target: &Path, source: &Path) -> Result<(), PathBuf> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = claims.get(target) {
            let free = held.source == source || (held.recorded && !target.is_file());
            if !free {
                return Err(held.source.clone());
            }
        }
        claims.insert(
            target.to_path_buf(),
            Claim {
                source: source.to_path_buf(),
                recorded: false,
            },
        );
        Ok(())
    }

    fn write_with_retry(&self, request: &WriteRequest<'_>) -> ArchiveResult<WriteOutcome> {
        let mut attempt = 0_u32;
        loop {
            match self.sink.write_entry(request) {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    self.metrics.inc_retry();
                    warn!(
                        path = %request.source.display(),
                        attempt,
                        error = %err.detail(),
                        "archive write failed; retrying"
                    );
                    thread::sleep(self.backoff * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn reject(&self, key: &ManifestKey, reason: RejectReason) -> FileReport {
        warn!(path = %key.path.display(), reason = reason.label(), "file rejected");
        let manifest_failed =
            !self.dry_run && !self.persist(ManifestRecord::rejected(key, reason.clone()));
        FileReport {
            path: key.path.clone(),
            outcome: FileOutcome::Rejected(reason),
            manifest_failed,
        }
    }

    fn finish_failed(&self, key: &ManifestKey, kind: FailureKind, detail: String) -> FileReport {
        let manifest_failed = !self.persist(ManifestRecord::failed(key, kind, detail.clone()));
        FileReport {
            path: key.path.clone(),
            outcome: FileOutcome::Failed { kind, detail },
            manifest_failed,
        }
    }

    fn internal_failure(&self, key: &ManifestKey, err: &JoinError) -> FileReport {
        error!(path = %key.path.display(), error = %err, "archive worker panicked");
        if self.dry_run {
            return FileReport::new(
                key.path.clone(),
                FileOutcome::Failed {
                    kind: FailureKind::Internal,
                    detail: err.to_string(),
                },
            );
        }
        self.finish_failed(key, FailureKind::Internal, err.to_string())
    }

    fn persist(&self, record: ManifestRecord) -> bool {
        let path = record.source.clone();
        match self.manifest.record(record) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err.detail(), "manifest record failed");
                self.metrics.inc_manifest_failure();
                false
            }
        }
    }
}
