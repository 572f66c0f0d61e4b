//! JSON policy file loading.
//!
//! # Design
//! - Policy files are optional; absent fields fall back to defaults.
//! - Unknown fields are rejected so typos never silently change behaviour.

use std::fs;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ArchivePolicy, PolicyOverrides};

/// Read a policy document from disk.
///
/// # Errors
///
/// Returns an error when the file cannot be read or is not a valid policy.
pub fn load_policy_file(path: &Path) -> ConfigResult<ArchivePolicy> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        operation: "policy.read",
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the effective policy: defaults, then the optional file, then overrides.
///
/// # Errors
///
/// Returns an error when the policy file is unreadable or the merged policy
/// fails validation.
pub fn load_policy(
    policy_file: Option<&Path>,
    overrides: PolicyOverrides,
) -> ConfigResult<ArchivePolicy> {
    let mut policy = match policy_file {
        Some(path) => load_policy_file(path)?,
        None => ArchivePolicy::default(),
    };
    policy.apply(overrides);
    policy.validate()?;
    Ok(policy)
}
