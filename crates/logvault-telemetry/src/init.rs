//! Tracing subscriber setup for the archiver.
//!
//! # Design
//! - One entry point installs either a human-readable or a JSON `fmt` layer.
//! - `RUST_LOG` wins over the configured level.
//! - Logs go to stderr so stdout carries only the run summary.
//! - The build identifier is recorded once and reused by every caller.

use std::io;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Level filter used when neither the caller nor `RUST_LOG` provide one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Settings for [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Level directive (`info`, `debug`, `logvault_archive=trace`, ...).
    pub level: &'a str,
    /// Line format.
    pub format: LogFormat,
    /// Build identifier attached to the start-up event.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Compact human-readable lines.
    Pretty,
}

impl LogFormat {
    /// Pretty for debug builds, JSON for release builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(TelemetryError::UnknownLogFormat {
                value: value.to_string(),
            }),
        }
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] when a global subscriber is
/// already set.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    if BUILD_SHA.set(config.build_sha.to_string()).is_err() {
        tracing::debug!("build identifier already recorded");
    }

    let filter = env_filter(config.level);
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(io::stderr)
                    .with_target(false),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_writer(io::stderr)
                    .with_target(false),
            )
            .try_init(),
    };
    installed.map_err(|source| TelemetryError::SubscriberInstall { source })?;

    tracing::debug!(
        build_sha = build_sha(),
        format = config.format.as_str(),
        "logging initialised"
    );
    Ok(())
}

/// Build identifier recorded by [`init_logging`], or `dev` before that.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
