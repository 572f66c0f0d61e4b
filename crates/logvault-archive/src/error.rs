//! # Design
//!
//! - Provide structured, constant-message errors for the archive pipeline.
//! - Capture operation context (paths, fields, patterns) so failures are reproducible in tests.
//! - Preserve source errors without interpolating context into error messages.

use std::io;
use std::path::PathBuf;

use logvault_config::ConfigError;
use thiserror::Error;

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors produced by the archive pipeline.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// IO failures while interacting with the filesystem.
    #[error("archive io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// JSON parsing or serialization failures for manifest state.
    #[error("archive json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path involved in the JSON failure.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Walkdir traversal failures.
    #[error("archive walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Globset compilation failures.
    #[error("archive glob failure")]
    Glob {
        /// Operation that triggered the glob failure.
        operation: &'static str,
        /// Glob pattern that failed to compile.
        pattern: String,
        /// Underlying globset error.
        source: globset::Error,
    },
    /// Marker pattern compilation failures.
    #[error("archive marker pattern failure")]
    Pattern {
        /// Underlying regex error.
        source: regex::Error,
    },
    /// Policy rejected during validation.
    #[error("archive invalid policy")]
    Policy {
        /// Underlying validation error.
        #[from]
        source: ConfigError,
    },
    /// Input root does not exist.
    #[error("archive input root missing")]
    InputRootMissing {
        /// Configured input root.
        path: PathBuf,
    },
    /// Input root exists but is not a directory.
    #[error("archive input root is not a directory")]
    InputRootNotDirectory {
        /// Configured input root.
        path: PathBuf,
    },
    /// Output root could not be created or written.
    #[error("archive output root unwritable")]
    OutputRootUnwritable {
        /// Configured output root.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A staged or existing archive did not decompress to the source bytes.
    #[error("archive verification mismatch")]
    VerificationMismatch {
        /// Archive file that failed verification.
        path: PathBuf,
        /// Which property differed.
        reason: &'static str,
    },
    /// A source file name cannot be used as an archive entry name.
    #[error("archive invalid entry name")]
    InvalidEntryName {
        /// Source path that produced the invalid name.
        path: PathBuf,
    },
    /// A blocking task could not be joined.
    #[error("archive task join failure")]
    TaskJoin {
        /// Operation the task was performing.
        operation: &'static str,
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
    /// Manifest opened read-only was asked to persist a record.
    #[error("archive manifest is read-only")]
    ManifestReadOnly {
        /// Manifest directory.
        path: PathBuf,
    },
}

impl ArchiveError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Json {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn glob(
        operation: &'static str,
        pattern: String,
        source: globset::Error,
    ) -> Self {
        Self::Glob {
            operation,
            pattern,
            source,
        }
    }

    /// Whether the error belongs to the fatal setup class.
    #[must_use]
    pub const fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::InputRootMissing { .. }
                | Self::InputRootNotDirectory { .. }
                | Self::OutputRootUnwritable { .. }
        )
    }

    /// Whether the error stems from an invalid policy.
    #[must_use]
    pub const fn is_policy(&self) -> bool {
        matches!(self, Self::Policy { .. } | Self::Glob { .. } | Self::Pattern { .. })
    }

    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ResourceBusy
                    | io::ErrorKind::StorageFull
            ),
            _ => false,
        }
    }

    /// Render the error with its context fields for operator-facing output.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} {}: {source}", path.display()),
            Self::Json {
                operation,
                path,
                source,
            } => format!("{operation} {}: {source}", path.display()),
            Self::Walkdir {
                operation,
                path,
                source,
            } => format!("{operation} {}: {source}", path.display()),
            Self::Glob {
                pattern, source, ..
            } => format!("{pattern}: {source}"),
            Self::Pattern { source } => source.to_string(),
            Self::Policy { source } => source.detail(),
            Self::InputRootMissing { path }
            | Self::InputRootNotDirectory { path }
            | Self::InvalidEntryName { path }
            | Self::ManifestReadOnly { path } => format!("{self}: {}", path.display()),
            Self::OutputRootUnwritable { path, source } => {
                format!("{self}: {}: {source}", path.display())
            }
            Self::TaskJoin { operation, source } => format!("{operation}: {source}"),
            Self::VerificationMismatch { path, reason } => {
                format!("{self} ({reason}): {}", path.display())
            }
        }
    }
}
