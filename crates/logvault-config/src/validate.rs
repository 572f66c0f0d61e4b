//! Range and consistency checks for archive policies.

use crate::defaults::{
    MAX_COMPRESSION_LEVEL, MAX_DATE_SCAN_BYTES, MAX_RETRIES, MAX_WORKERS, MIN_SCAN_CHUNK_BYTES,
};
use crate::error::{ConfigError, ConfigResult};
use crate::model::ArchivePolicy;

impl ArchivePolicy {
    /// Validate every tunable, returning the first offending field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the field and reason.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.input_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "input_root",
                reason: "required",
                value: None,
            });
        }
        if self.output_root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "output_root",
                reason: "required",
                value: None,
            });
        }
        if self.input_root == self.output_root {
            return Err(ConfigError::invalid(
                "output_root",
                "must_differ_from_input_root",
                self.output_root.display(),
            ));
        }
        if self.input_root.starts_with(&self.output_root) {
            return Err(ConfigError::invalid(
                "output_root",
                "must_not_contain_input_root",
                self.output_root.display(),
            ));
        }
        if !(1..=MAX_WORKERS).contains(&self.workers) {
            return Err(ConfigError::invalid(
                "workers",
                "out_of_range",
                self.workers,
            ));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(ConfigError::invalid(
                "max_retries",
                "out_of_range",
                self.max_retries,
            ));
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(ConfigError::invalid(
                "compression_level",
                "out_of_range",
                self.compression_level,
            ));
        }
        validate_markers(&self.offline_markers)?;
        if self.include.iter().any(|pattern| pattern.trim().is_empty()) {
            return Err(ConfigError::InvalidField {
                field: "include",
                reason: "empty_pattern",
                value: None,
            });
        }
        if !(1..=MAX_DATE_SCAN_BYTES).contains(&self.date_scan_bytes) {
            return Err(ConfigError::invalid(
                "date_scan_bytes",
                "out_of_range",
                self.date_scan_bytes,
            ));
        }
        if self.scan_chunk_bytes < MIN_SCAN_CHUNK_BYTES
            || self.scan_chunk_bytes <= self.longest_marker()
        {
            return Err(ConfigError::invalid(
                "scan_chunk_bytes",
                "smaller_than_marker",
                self.scan_chunk_bytes,
            ));
        }
        Ok(())
    }
}

fn validate_markers(markers: &[String]) -> ConfigResult<()> {
    if markers.is_empty() {
        return Err(ConfigError::InvalidField {
            field: "offline_markers",
            reason: "required",
            value: None,
        });
    }
    if markers.iter().any(String::is_empty) {
        return Err(ConfigError::InvalidField {
            field: "offline_markers",
            reason: "empty_marker",
            value: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ArchivePolicy {
        ArchivePolicy::new("/logs", "/archive")
    }

    fn rejected_field(policy: &ArchivePolicy) -> Option<&'static str> {
        match policy.validate() {
            Err(ConfigError::InvalidField { field, .. }) => Some(field),
            _ => None,
        }
    }

    #[test]
    fn default_policy_with_roots_is_valid() {
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn missing_roots_are_rejected() {
        let mut missing_input = policy();
        missing_input.input_root = "".into();
        assert_eq!(rejected_field(&missing_input), Some("input_root"));

        let mut same_roots = policy();
        same_roots.output_root = "/logs".into();
        assert_eq!(rejected_field(&same_roots), Some("output_root"));

        let mut nested_input = policy();
        nested_input.input_root = "/archive/incoming".into();
        assert_eq!(rejected_field(&nested_input), Some("output_root"));
    }

    #[test]
    fn numeric_ranges_are_enforced() {
        let mut zero_workers = policy();
        zero_workers.workers = 0;
        assert_eq!(rejected_field(&zero_workers), Some("workers"));

        let mut level = policy();
        level.compression_level = 10;
        assert_eq!(rejected_field(&level), Some("compression_level"));

        let mut retries = policy();
        retries.max_retries = MAX_RETRIES + 1;
        assert_eq!(rejected_field(&retries), Some("max_retries"));

        let mut scan = policy();
        scan.date_scan_bytes = 0;
        assert_eq!(rejected_field(&scan), Some("date_scan_bytes"));
    }

    #[test]
    fn markers_must_be_present_and_fit_the_chunk() {
        let mut empty = policy();
        empty.offline_markers.clear();
        assert_eq!(rejected_field(&empty), Some("offline_markers"));

        let mut blank = policy();
        blank.offline_markers = vec![String::new()];
        assert_eq!(rejected_field(&blank), Some("offline_markers"));

        let mut long_marker = policy();
        long_marker.scan_chunk_bytes = 32;
        long_marker.offline_markers = vec!["x".repeat(40)];
        assert_eq!(rejected_field(&long_marker), Some("scan_chunk_bytes"));
    }

    #[test]
    fn blank_include_patterns_are_rejected() {
        let mut blank = policy();
        blank.include = vec!["**/*.json".to_string(), "  ".to_string()];
        assert_eq!(rejected_field(&blank), Some("include"));
    }
}
