//! Renderers for the end-of-run summary.

use std::fmt::Write as _;
use std::io::{self, Write as _};

use anyhow::anyhow;
use logvault_archive::RunSummary;

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};

pub(crate) fn render_summary(summary: &RunSummary, format: OutputFormat) -> CliResult<()> {
    let text = format_summary(summary, format)?;
    writeln!(io::stdout().lock(), "{text}")
        .map_err(|err| CliError::failure(anyhow!("failed to write summary: {err}")))
}

pub(crate) fn format_summary(summary: &RunSummary, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(summary)
            .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}"))),
        OutputFormat::Table => Ok(summary_table(summary)),
    }
}

fn summary_table(summary: &RunSummary) -> String {
    let mut out = String::new();
    let status = if summary.interrupted {
        "interrupted"
    } else {
        "complete"
    };
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    // Writing into a String cannot fail.
    let _ = writeln!(out, "run: {status}{mode} in {} ms", summary.duration_ms);
    let _ = writeln!(out, "processed: {}", summary.processed);
    let _ = writeln!(
        out,
        "archived: {} (reused {})",
        summary.archived, summary.reused
    );
    let _ = writeln!(out, "skipped: {}", summary.skipped);
    if summary.dry_run {
        let _ = writeln!(out, "planned: {}", summary.planned);
    }
    let _ = writeln!(out, "ignored: {}", summary.ignored);
    let _ = writeln!(out, "rejected: {}", summary.rejected_total());
    for (reason, count) in &summary.rejected {
        let _ = writeln!(out, "  {reason}: {count}");
    }
    let _ = writeln!(out, "failed: {}", summary.failed_total());
    for (kind, count) in &summary.failed {
        let _ = writeln!(out, "  {kind}: {count}");
    }
    let _ = writeln!(
        out,
        "bytes: in {} / out {}",
        format_bytes(summary.bytes_in),
        format_bytes(summary.bytes_out)
    );
    if summary.manifest_failures > 0 {
        let _ = writeln!(out, "manifest failures: {}", summary.manifest_failures);
    }
    if summary.orphans_removed > 0 {
        let _ = writeln!(out, "staging orphans removed: {}", summary.orphans_removed);
    }
    if !summary.problems.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<9} {:<16} PATH", "OUTCOME", "REASON");
        for problem in &summary.problems {
            let _ = writeln!(
                out,
                "{:<9} {:<16} {}",
                problem.outcome,
                problem.reason,
                problem.path.display()
            );
            if !problem.detail.is_empty() {
                let _ = writeln!(out, "{:<26} {}", "", problem.detail);
            }
        }
    }
    out.trim_end().to_string()
}

#[must_use]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;
    let value = bytes_to_f64(bytes);
    if value >= GIB {
        format!("{:.2} GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2} MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2} KiB", value / KIB)
    } else {
        format!("{bytes} B")
    }
}

fn bytes_to_f64(value: u64) -> f64 {
    let high = u32::try_from(value >> 32).unwrap_or(u32::MAX);
    let low = u32::try_from(value & 0xFFFF_FFFF).unwrap_or(u32::MAX);
    f64::from(high) * 4_294_967_296.0 + f64::from(low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvault_archive::{FailureKind, FileOutcome, FileReport, RejectReason};
    use std::path::PathBuf;

    fn sample() -> RunSummary {
        let mut summary = RunSummary::default();
        summary.absorb(FileReport::new(
            PathBuf::from("/logs/2019070412gm-a.json"),
            FileOutcome::Rejected(RejectReason::OfflinePlayer {
                marker: "BYE".to_string(),
            }),
        ));
        summary.absorb(FileReport::new(
            PathBuf::from("/logs/2019070413gm-b.json"),
            FileOutcome::Failed {
                kind: FailureKind::WriteFailure,
                detail: "no space left on device".to_string(),
            },
        ));
        summary.absorb(FileReport::new(
            PathBuf::from("/logs/2019070414gm-c.json"),
            FileOutcome::Skipped,
        ));
        summary.sort_problems();
        summary
    }

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn table_lists_counts_and_problem_paths() -> CliResult<()> {
        let text = format_summary(&sample(), OutputFormat::Table)?;
        assert!(text.starts_with("run: complete"));
        assert!(text.contains("processed: 3"));
        assert!(text.contains("skipped: 1"));
        assert!(text.contains("rejected: 1"));
        assert!(text.contains("  offline_player: 1"));
        assert!(text.contains("  write_failure: 1"));
        assert!(text.contains("/logs/2019070413gm-b.json"));
        assert!(text.contains("no space left on device"));
        assert!(!text.contains("planned:"));
        Ok(())
    }

    #[test]
    fn json_output_round_trips_through_serde() -> CliResult<()> {
        let text = format_summary(&sample(), OutputFormat::Json)?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| CliError::failure(anyhow!("invalid json: {err}")))?;
        assert_eq!(value["processed"], 3);
        assert_eq!(value["rejected"]["offline_player"], 1);
        assert_eq!(value["problems"][0]["reason"], "offline_player");
        assert_eq!(value["interrupted"], false);
        Ok(())
    }
}
