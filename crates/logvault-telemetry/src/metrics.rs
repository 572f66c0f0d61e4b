//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters/gauges an archive run produces.
//! - Cheap to clone; workers share one registry through an `Arc`.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across archive workers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    files_total: IntCounterVec,
    bytes_in_total: IntCounter,
    bytes_out_total: IntCounter,
    retries_total: IntCounter,
    manifest_failures_total: IntCounter,
    inflight: IntGauge,
}

/// Snapshot of selected gauges and counters for end-of-run reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Raw bytes read from archived sources.
    pub bytes_in_total: u64,
    /// Compressed bytes published to the archive.
    pub bytes_out_total: u64,
    /// Write retries attempted across the run.
    pub retries_total: u64,
    /// Manifest records that could not be persisted.
    pub manifest_failures_total: u64,
    /// Files currently being processed.
    pub inflight: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the archive collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let files_total = IntCounterVec::new(
            Opts::new("archive_files_total", "Files processed by terminal outcome"),
            &["outcome"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "archive_files_total",
            source,
        })?;
        let bytes_in_total = counter("archive_bytes_in_total", "Raw bytes read from archived sources")?;
        let bytes_out_total = counter(
            "archive_bytes_out_total",
            "Compressed bytes published to the archive",
        )?;
        let retries_total = counter("archive_retries_total", "Archive write retries attempted")?;
        let manifest_failures_total = counter(
            "archive_manifest_failures_total",
            "Manifest records that could not be persisted",
        )?;
        let inflight = IntGauge::with_opts(Opts::new(
            "archive_inflight",
            "Files currently being processed",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "archive_inflight",
            source,
        })?;

        register(&registry, "archive_files_total", Box::new(files_total.clone()))?;
        register(
            &registry,
            "archive_bytes_in_total",
            Box::new(bytes_in_total.clone()),
        )?;
        register(
            &registry,
            "archive_bytes_out_total",
            Box::new(bytes_out_total.clone()),
        )?;
        register(&registry, "archive_retries_total", Box::new(retries_total.clone()))?;
        register(
            &registry,
            "archive_manifest_failures_total",
            Box::new(manifest_failures_total.clone()),
        )?;
        register(&registry, "archive_inflight", Box::new(inflight.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                files_total,
                bytes_in_total,
                bytes_out_total,
                retries_total,
                manifest_failures_total,
                inflight,
            }),
        })
    }

    /// Increment the per-outcome file counter (`archived`, `rejected`, ...).
    pub fn inc_file(&self, outcome: &str) {
        self.inner.files_total.with_label_values(&[outcome]).inc();
    }

    /// Record bytes read from a source and written to its archive entry.
    pub fn add_bytes(&self, bytes_in: u64, bytes_out: u64) {
        self.inner.bytes_in_total.inc_by(bytes_in);
        self.inner.bytes_out_total.inc_by(bytes_out);
    }

    /// Increment the write retry counter.
    pub fn inc_retry(&self) {
        self.inner.retries_total.inc();
    }

    /// Increment the manifest failure counter.
    pub fn inc_manifest_failure(&self) {
        self.inner.manifest_failures_total.inc();
    }

    /// Mark a file as entering the worker pool.
    pub fn inflight_started(&self) {
        self.inner.inflight.inc();
    }

    /// Mark a file as leaving the worker pool.
    pub fn inflight_finished(&self) {
        self.inner.inflight.dec();
    }

    /// Current value of the per-outcome counter.
    #[must_use]
    pub fn file_count(&self, outcome: &str) -> u64 {
        self.inner.files_total.with_label_values(&[outcome]).get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the byte and failure counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_in_total: self.inner.bytes_in_total.get(),
            bytes_out_total: self.inner.bytes_out_total.get(),
            retries_total: self.inner.retries_total.get(),
            manifest_failures_total: self.inner.manifest_failures_total.get(),
            inflight: self.inner.inflight.get(),
        }
    }
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register(
    registry: &Registry,
    name: &'static str,
    collector: Box<dyn prometheus::core::Collector>,
) -> Result<()> {
    registry
        .register(collector)
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_file("archived");
        metrics.inc_file("archived");
        metrics.inc_file("rejected");
        metrics.add_bytes(1_024, 256);
        metrics.inc_retry();
        metrics.inc_manifest_failure();
        metrics.inflight_started();
        metrics.inflight_started();
        metrics.inflight_finished();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_in_total, 1_024);
        assert_eq!(snapshot.bytes_out_total, 256);
        assert_eq!(snapshot.retries_total, 1);
        assert_eq!(snapshot.manifest_failures_total, 1);
        assert_eq!(snapshot.inflight, 1);
        assert_eq!(metrics.file_count("archived"), 2);
        assert_eq!(metrics.file_count("failed"), 0);

        let rendered = metrics.render()?;
        assert!(rendered.contains(r#"archive_files_total{outcome="archived"} 2"#));
        assert!(rendered.contains("archive_bytes_out_total 256"));
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_file("archived");
        assert_eq!(second.file_count("archived"), 0);
        Ok(())
    }
}
