//! Error types for policy loading and validation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Policy file could not be read.
    #[error("failed to read policy file")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Policy file path.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// Policy file was not a valid policy document.
    #[error("failed to parse policy file")]
    Parse {
        /// Policy file path.
        path: PathBuf,
        /// Source JSON error.
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &'static str,
        reason: &'static str,
        value: impl ToString,
    ) -> Self {
        Self::InvalidField {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }

    /// Human-readable rendering including the context fields.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidField {
                field,
                reason,
                value: Some(value),
            } => format!("{field}: {reason} (got {value})"),
            Self::InvalidField {
                field,
                reason,
                value: None,
            } => format!("{field}: {reason}"),
            Self::Io { path, source, .. } => format!("{}: {source}", path.display()),
            Self::Parse { path, source } => format!("{}: {source}", path.display()),
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn detail_includes_context_fields() {
        let err = ConfigError::invalid("workers", "must_be_positive", 0);
        assert_eq!(err.to_string(), "invalid configuration field");
        assert_eq!(err.detail(), "workers: must_be_positive (got 0)");
        assert!(err.source().is_none());

        let io_err = ConfigError::Io {
            operation: "policy.read",
            path: PathBuf::from("policy.json"),
            source: io::Error::other("denied"),
        };
        assert!(io_err.detail().starts_with("policy.json"));
        assert!(io_err.source().is_some());
    }
}
