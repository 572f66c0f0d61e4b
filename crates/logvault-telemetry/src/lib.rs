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

//! Telemetry primitives shared across the logvault workspace.
//!
//! Layout: `init.rs` (tracing subscriber setup), `metrics.rs` (Prometheus
//! registry for archive runs), `error.rs` (telemetry error type).

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
