//! Error types for logging and metrics setup.

use prometheus::Error as PrometheusError;
use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or maintaining the metrics registry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The global tracing subscriber was already set or could not be installed.
    #[error("tracing subscriber install failed")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// A log format name was not recognised.
    #[error("unknown log format")]
    UnknownLogFormat {
        /// Name supplied by the caller.
        value: String,
    },
    /// A run metric could not be constructed.
    #[error("metric construction failed")]
    MetricsCollector {
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// A run metric could not be added to the registry.
    #[error("metric registration failed")]
    MetricsRegister {
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// The text exposition could not be produced.
    #[error("metric exposition failed")]
    MetricsEncode {
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// The text exposition was not UTF-8.
    #[error("metric exposition was not utf-8")]
    MetricsUtf8 {
        /// Underlying conversion error.
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    /// Render the error with its context fields for operator-facing output.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::SubscriberInstall { source } => format!("{self}: {source}"),
            Self::UnknownLogFormat { value } => format!("{self}: {value}"),
            Self::MetricsCollector { name, source } | Self::MetricsRegister { name, source } => {
                format!("{self} ({name}): {source}")
            }
            Self::MetricsEncode { source } => format!("{self}: {source}"),
            Self::MetricsUtf8 { source } => format!("{self}: {source}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn metric_errors_keep_name_and_source() {
        let err = TelemetryError::MetricsRegister {
            name: "archive_retries_total",
            source: PrometheusError::AlreadyReg,
        };
        assert_eq!(err.to_string(), "metric registration failed");
        assert!(err.source().is_some());
        assert!(err.detail().contains("archive_retries_total"));
    }

    #[test]
    fn unknown_format_reports_value_without_source() {
        let err = TelemetryError::UnknownLogFormat {
            value: "yaml".to_string(),
        };
        assert!(err.source().is_none());
        assert_eq!(err.detail(), "unknown log format: yaml");
    }

    #[test]
    fn utf8_failures_chain_their_source() {
        let Err(source) = String::from_utf8(vec![0, 159]) else {
            panic!("invalid utf-8 should fail to convert");
        };
        let err = TelemetryError::MetricsUtf8 { source };
        assert!(err.source().is_some());
        assert!(err.detail().starts_with("metric exposition was not utf-8: "));
    }
}
