#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Date-partitioned gzip archiving for match-log trees.
//!
//! Layout: `classify.rs` (offline-player marker scan), `date.rs` (date
//! resolution), `partition.rs` (partition paths), `writer.rs` (atomic gzip
//! sink), `manifest.rs` (resumable progress state), `service.rs` (batch
//! orchestrator), `summary.rs` (per-file reports and run totals).

pub mod classify;
pub mod date;
pub mod error;
pub mod manifest;
pub mod model;
pub mod partition;
pub mod service;
pub mod summary;
pub mod writer;

pub use classify::Classifier;
pub use date::{DateResolver, resolve_date};
pub use error::{ArchiveError, ArchiveResult};
pub use manifest::Manifest;
pub use model::{
    ArchiveEntry, Classification, DatePartition, FailureKind, InputRecord, ManifestKey,
    ManifestOutcome, ManifestRecord, RejectReason,
};
pub use partition::{partition_dir, partition_path};
pub use service::ArchiveService;
pub use summary::{FileOutcome, FileReport, ProblemFile, RunSummary};
pub use writer::{ArchiveSink, GzipArchiveWriter, WriteOutcome, WriteRequest, sweep_orphans};
