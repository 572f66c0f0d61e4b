//! Deterministic date derivation from file names and content prefixes.
//!
//! # Design
//! - Pure over `(name, prefix)`; no clock, locale or environment input.
//! - File name wins; content patterns are tried in a fixed order.
//! - Only the first occurrence of each pattern counts and invalid dates are
//!   never coerced; an invalid value falls through to the next pattern.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use chrono::{DateTime, Datelike};
use once_cell::sync::Lazy;
use regex::Regex;
use regex::bytes::Regex as BytesRegex;

use crate::model::DatePartition;

static NAME_LEADING: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})").ok());
static NAME_SEPARATED: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?:(\d{4})-(\d{2})-(\d{2}))|(?:(\d{4})_(\d{2})_(\d{2}))").ok()
});
static CONTENT_REF: Lazy<Option<BytesRegex>> =
    Lazy::new(|| BytesRegex::new(r#""ref"\s*:\s*"(\d{4})(\d{2})(\d{2})"#).ok());
static CONTENT_ISO: Lazy<Option<BytesRegex>> =
    Lazy::new(|| BytesRegex::new(r"(\d{4})-(\d{2})-(\d{2})[T ]\d{2}:\d{2}").ok());
static CONTENT_EPOCH: Lazy<Option<BytesRegex>> = Lazy::new(|| {
    BytesRegex::new(r#""(?:timestamp|time|started_at)"\s*:\s*(\d{10})(?:[^\d]|$)"#).ok()
});

/// Derives archive partitions for accepted files.
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    scan_bytes: usize,
}

impl DateResolver {
    /// Resolver scanning at most `scan_bytes` of content.
    #[must_use]
    pub const fn new(scan_bytes: usize) -> Self {
        Self { scan_bytes }
    }

    /// Resolve a date for the file at `path`, reading content only if the name carries none.
    ///
    /// # Errors
    ///
    /// Returns an IO error when the content prefix is needed but cannot be read.
    pub fn resolve_path(&self, path: &Path) -> io::Result<Option<DatePartition>> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if let Some(partition) = from_name(&name) {
            return Ok(Some(partition));
        }
        let prefix = self.read_prefix(path)?;
        Ok(from_content(&prefix))
    }

    fn read_prefix(&self, path: &Path) -> io::Result<Vec<u8>> {
        let limit = u64::try_from(self.scan_bytes).unwrap_or(u64::MAX);
        let mut prefix = Vec::new();
        File::open(path)?.take(limit).read_to_end(&mut prefix)?;
        Ok(prefix)
    }
}

/// Resolve a date from a file name and content prefix.
#[must_use]
pub fn resolve_date(name: &str, prefix: &[u8]) -> Option<DatePartition> {
    from_name(name).or_else(|| from_content(prefix))
}

fn from_name(name: &str) -> Option<DatePartition> {
    let leading = NAME_LEADING.as_ref().and_then(|re| {
        let caps = re.captures(name)?;
        partition_from_strs(&caps[1], &caps[2], &caps[3])
    });
    leading.or_else(|| {
        NAME_SEPARATED.as_ref().and_then(|re| {
            let caps = re.captures(name)?;
            let offset = if caps.get(1).is_some() { 1 } else { 4 };
            partition_from_strs(
                caps.get(offset)?.as_str(),
                caps.get(offset + 1)?.as_str(),
                caps.get(offset + 2)?.as_str(),
            )
        })
    })
}

fn from_content(prefix: &[u8]) -> Option<DatePartition> {
    first_ymd(CONTENT_REF.as_ref(), prefix)
        .or_else(|| first_ymd(CONTENT_ISO.as_ref(), prefix))
        .or_else(|| first_epoch(prefix))
}

fn first_ymd(pattern: Option<&BytesRegex>, prefix: &[u8]) -> Option<DatePartition> {
    let caps = pattern?.captures(prefix)?;
    partition_from_strs(
        std::str::from_utf8(&caps[1]).ok()?,
        std::str::from_utf8(&caps[2]).ok()?,
        std::str::from_utf8(&caps[3]).ok()?,
    )
}

fn first_epoch(prefix: &[u8]) -> Option<DatePartition> {
    let caps = CONTENT_EPOCH.as_ref()?.captures(prefix)?;
    let seconds: i64 = std::str::from_utf8(&caps[1]).ok()?.parse().ok()?;
    let timestamp = DateTime::from_timestamp(seconds, 0)?;
    DatePartition::new(
        u32::try_from(timestamp.year()).ok()?,
        timestamp.month(),
        timestamp.day(),
    )
}

fn partition_from_strs(year: &str, month: &str, day: &str) -> Option<DatePartition> {
    DatePartition::new(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn ymd(year: u32, month: u32, day: u32) -> Option<DatePartition> {
        DatePartition::new(year, month, day)
    }

    #[test]
    fn tenhou_ids_use_leading_digits() {
        assert_eq!(
            resolve_date("2019070419gm-00a9-0000-557e4086.json", b""),
            ymd(2019, 7, 4)
        );
        assert_eq!(resolve_date("20240229.json", b""), ymd(2024, 2, 29));
    }

    #[test]
    fn separated_dates_in_names_are_found() {
        assert_eq!(resolve_date("match-2021-03-15-a.json", b""), ymd(2021, 3, 15));
        assert_eq!(resolve_date("log_2021_12_01.json", b""), ymd(2021, 12, 1));
        assert_eq!(resolve_date("log_2021-12_01.json", b""), None);
    }

    #[test]
    fn invalid_leading_date_falls_back_to_later_patterns() {
        assert_eq!(
            resolve_date("20191301-room-2019-07-04.json", b""),
            ymd(2019, 7, 4)
        );
        assert_eq!(
            resolve_date("20191301gm.json", br#"{"ref":"2018010203gm-0009"}"#),
            ymd(2018, 1, 2)
        );
    }

    #[test]
    fn month_thirteen_and_feb_thirtieth_are_undated() {
        assert_eq!(resolve_date("20191301gm.json", b""), None);
        assert_eq!(resolve_date("20190230gm.json", b"{}"), None);
        assert_eq!(
            resolve_date("game.json", br#"{"ref":"20191340gm"}"#),
            None
        );
    }

    #[test]
    fn content_patterns_follow_fixed_order() {
        let both = br#"{"started":"2020-05-06T07:08:09Z","ref":"2019070419gm"}"#;
        assert_eq!(resolve_date("game.json", both), ymd(2019, 7, 4));
        assert_eq!(
            resolve_date("game.json", br#"{"started":"2020-05-06 07:08"}"#),
            ymd(2020, 5, 6)
        );
        assert_eq!(
            resolve_date("game.json", br#"{"timestamp": 1562198400, "x": 1}"#),
            ymd(2019, 7, 4)
        );
    }

    #[test]
    fn only_the_first_iso_occurrence_counts() {
        let payload = b"2020-13-01T00:00 then 2020-01-02T00:00";
        assert_eq!(resolve_date("game.json", payload), None);
    }

    #[test]
    fn epoch_requires_exactly_ten_digits() {
        assert_eq!(resolve_date("game.json", br#"{"time": 15621984000}"#), None);
        assert_eq!(resolve_date("game.json", br#"{"time": 156219840}"#), None);
    }

    #[test]
    fn nothing_datable_is_undated() {
        assert_eq!(resolve_date("game.json", b"{\"log\":[]}"), None);
        assert_eq!(resolve_date("", b""), None);
    }

    #[test]
    fn resolve_path_reads_bounded_prefix() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("game.json");
        let mut payload = vec![b' '; 64];
        payload.extend_from_slice(br#"{"ref":"2019070419gm"}"#);
        fs::write(&path, &payload)?;

        assert_eq!(DateResolver::new(32).resolve_path(&path)?, None);
        assert_eq!(DateResolver::new(4_096).resolve_path(&path)?, ymd(2019, 7, 4));

        let named = dir.path().join("20200101gm.json");
        assert_eq!(DateResolver::new(1).resolve_path(&named)?, ymd(2020, 1, 1));
        assert!(DateResolver::new(1).resolve_path(&dir.path().join("x")).is_err());
        Ok(())
    }
}
