//! CLI error type and its mapping onto process exit codes.

use std::fmt::{self, Display, Formatter};

use anyhow::anyhow;
use logvault_archive::ArchiveError;
use logvault_config::ConfigError;

/// CLI-level error type to distinguish validation from operational failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(error: ConfigError) -> Self {
        Self::validation(format!("invalid policy: {}", error.detail()))
    }
}

impl From<ArchiveError> for CliError {
    fn from(error: ArchiveError) -> Self {
        if error.is_policy() {
            Self::validation(format!("invalid policy: {}", error.detail()))
        } else {
            Self::failure(anyhow!(error.detail()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exit_codes_split_validation_from_failure() {
        let validation = CliError::validation("bad workers");
        assert_eq!(validation.exit_code(), 2);
        assert_eq!(validation.display_message(), "bad workers");

        let failure = CliError::failure(anyhow!("disk gone"));
        assert_eq!(failure.exit_code(), 3);
        assert_eq!(failure.display_message(), "disk gone");
        assert_eq!(failure.to_string(), "cli error");
    }

    #[test]
    fn archive_errors_map_by_class() {
        let setup: CliError = ArchiveError::InputRootMissing {
            path: PathBuf::from("/missing/logs"),
        }
        .into();
        assert_eq!(setup.exit_code(), 3);
        assert!(setup.display_message().contains("/missing/logs"));

        let policy: CliError = ArchiveError::from(ConfigError::InvalidField {
            field: "workers",
            reason: "must be between 1 and 64",
            value: Some("0".to_string()),
        })
        .into();
        assert_eq!(policy.exit_code(), 2);
        assert!(policy.display_message().starts_with("invalid policy"));
    }
}
