//! Argument parsing, policy assembly, and the archive run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use logvault_archive::{ArchiveService, RunSummary};
use logvault_config::{ArchivePolicy, PolicyOverrides, load_policy};
use logvault_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, Metrics, init_logging};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{CliError, CliResult};
use crate::output::render_summary;

const BUILD_SHA: &str = match option_env!("LOGVAULT_BUILD_SHA") {
    Some(sha) => sha,
    None => "dev",
};

/// Parses CLI arguments, runs the archive, and prints the summary.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    match execute(&cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn execute(cli: &Cli) -> CliResult<()> {
    let policy = cli.policy()?;
    init_logging(&LoggingConfig {
        level: &cli.log_level,
        format: cli.log_format.map_or_else(LogFormat::infer, LogFormat::from),
        build_sha: BUILD_SHA,
    })
    .map_err(|err| {
        CliError::failure(anyhow!("failed to initialise logging: {}", err.detail()))
    })?;
    let metrics = Metrics::new().map_err(|err| {
        CliError::failure(anyhow!("failed to initialise metrics: {}", err.detail()))
    })?;

    info!(
        input = %policy.input_root.display(),
        output = %policy.output_root.display(),
        workers = policy.workers,
        dry_run = policy.dry_run,
        "logvault starting"
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let interrupt = tokio::spawn(forward_interrupt(cancel_tx));
    let result = archive(policy, &metrics, cancel_rx).await;
    interrupt.abort();
    let summary = result?;

    let published = publish(&summary, cli.output, &metrics, cli.metrics_file.as_deref());
    debug!(published, "archive run complete");
    Ok(())
}

/// Print the summary and write the metrics file. Failures here are logged only;
/// the run itself has already completed. Returns whether every output was written.
fn publish(
    summary: &RunSummary,
    format: OutputFormat,
    metrics: &Metrics,
    metrics_file: Option<&Path>,
) -> bool {
    let mut published = true;
    if let Err(err) = render_summary(summary, format) {
        warn!(error = %err.display_message(), "failed to print run summary");
        published = false;
    }
    if let Some(path) = metrics_file
        && let Err(err) = write_metrics(metrics, path)
    {
        warn!(error = %err.display_message(), "failed to write metrics file");
        published = false;
    }
    published
}

pub(crate) async fn archive(
    policy: ArchivePolicy,
    metrics: &Metrics,
    cancel: watch::Receiver<bool>,
) -> CliResult<RunSummary> {
    let service = ArchiveService::new(policy, metrics.clone());
    Ok(service.run(cancel).await?)
}

async fn forward_interrupt(cancel: watch::Sender<bool>) {
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received; finishing in-flight files");
            cancel.send_modify(|cancelled| *cancelled = true);
        }
        Err(err) => warn!(error = %err, "failed to listen for interrupt"),
    }
}

pub(crate) fn write_metrics(metrics: &Metrics, path: &Path) -> CliResult<()> {
    let text = metrics.render().map_err(|err| {
        CliError::failure(anyhow!("failed to render metrics: {}", err.detail()))
    })?;
    fs::write(path, text).map_err(|err| {
        CliError::failure(anyhow!(
            "failed to write metrics file {}: {err}",
            path.display()
        ))
    })
}

#[derive(Parser, Debug)]
#[command(
    name = "logvault",
    version,
    about = "Archive match logs into date-partitioned gzip files"
)]
pub(crate) struct Cli {
    #[arg(value_name = "INPUT", help = "Root of the match-log tree")]
    input: PathBuf,
    #[arg(value_name = "OUTPUT", help = "Root of the date-partitioned archive")]
    output_root: PathBuf,
    #[arg(long, value_name = "FILE", help = "JSON policy file")]
    config: Option<PathBuf>,
    #[arg(
        long,
        value_name = "DIR",
        help = "Manifest directory [default: <OUTPUT>/.logvault]"
    )]
    manifest: Option<PathBuf>,
    #[arg(long, env = "LOGVAULT_WORKERS", help = "Files processed concurrently")]
    workers: Option<usize>,
    #[arg(long, help = "Extra write attempts per file")]
    max_retries: Option<u32>,
    #[arg(long, value_name = "0-9", help = "Gzip compression level")]
    compression_level: Option<u32>,
    #[arg(
        long = "offline-marker",
        value_name = "TEXT",
        help = "Byte string marking a disconnected player (repeatable)"
    )]
    offline_markers: Vec<String>,
    #[arg(
        long = "include",
        value_name = "GLOB",
        help = "Only archive files matching this glob (repeatable)"
    )]
    include: Vec<String>,
    #[arg(long, value_name = "BYTES", help = "Content bytes scanned for a date")]
    date_scan_bytes: Option<usize>,
    #[arg(long, help = "Skip decompress-and-compare before publishing")]
    no_verify: bool,
    #[arg(long, help = "Report what would be archived without writing")]
    dry_run: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[arg(long, value_name = "FILE", help = "Write Prometheus metrics here")]
    metrics_file: Option<PathBuf>,
    #[arg(long, env = "LOGVAULT_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
    #[arg(long, env = "LOGVAULT_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormatArg>,
}

impl Cli {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            input_root: Some(self.input.clone()),
            output_root: Some(self.output_root.clone()),
            manifest_dir: self.manifest.clone(),
            workers: self.workers,
            max_retries: self.max_retries,
            compression_level: self.compression_level,
            offline_markers: self.offline_markers.clone(),
            include: self.include.clone(),
            date_scan_bytes: self.date_scan_bytes,
            verify_after_write: self.no_verify.then_some(false),
            dry_run: self.dry_run.then_some(true),
        }
    }

    pub(crate) fn policy(&self) -> CliResult<ArchivePolicy> {
        Ok(load_policy(self.config.as_deref(), self.overrides())?)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use logvault_test_support::archive::archive_entries;
    use logvault_test_support::fixtures::{LogTree, tenhou_log};
    use std::ffi::OsString;

    fn parse<I, T>(args: I) -> Result<Cli>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Cli::try_parse_from(args)?)
    }

    #[test]
    fn flags_become_policy_overrides() -> Result<()> {
        let cli = parse([
            "logvault",
            "/data/logs",
            "/data/archive",
            "--workers",
            "3",
            "--compression-level",
            "9",
            "--offline-marker",
            "BYE",
            "--offline-marker",
            "DISCONNECT",
            "--include",
            "**/*.json",
            "--no-verify",
            "--dry-run",
            "--output",
            "json",
        ])?;
        let overrides = cli.overrides();
        assert_eq!(overrides.input_root, Some(PathBuf::from("/data/logs")));
        assert_eq!(overrides.output_root, Some(PathBuf::from("/data/archive")));
        assert_eq!(overrides.workers, Some(3));
        assert_eq!(overrides.compression_level, Some(9));
        assert_eq!(overrides.offline_markers, vec!["BYE", "DISCONNECT"]);
        assert_eq!(overrides.include, vec!["**/*.json"]);
        assert_eq!(overrides.verify_after_write, Some(false));
        assert_eq!(overrides.dry_run, Some(true));
        assert_eq!(cli.output, OutputFormat::Json);
        Ok(())
    }

    #[test]
    fn absent_toggles_leave_policy_file_values_alone() -> Result<()> {
        let tree = LogTree::new()?;
        let config = tree.root().join("policy.json");
        fs::write(
            &config,
            r#"{ "verify_after_write": false, "compression_level": 1 }"#,
        )?;
        let cli = parse([
            OsString::from("logvault"),
            tree.input().as_os_str().to_owned(),
            tree.output().as_os_str().to_owned(),
            OsString::from("--config"),
            config.as_os_str().to_owned(),
            OsString::from("--compression-level"),
            OsString::from("4"),
        ])?;
        let policy = cli.policy().map_err(|err| anyhow!(err.display_message()))?;
        assert!(!policy.verify_after_write);
        assert_eq!(policy.compression_level, 4);
        assert!(!policy.dry_run);
        Ok(())
    }

    #[test]
    fn invalid_policy_maps_to_validation_exit() -> Result<()> {
        let cli = parse(["logvault", "/data/logs", "/data/logs", "--workers", "2"])?;
        let Err(err) = cli.policy() else {
            return Err(anyhow!("identical roots should be rejected"));
        };
        assert_eq!(err.exit_code(), 2);
        Ok(())
    }

    #[test]
    fn missing_positionals_are_rejected_by_parser() {
        assert!(Cli::try_parse_from(["logvault", "/data/logs"]).is_err());
    }

    #[test]
    fn log_format_arg_maps_to_telemetry_format() {
        assert_eq!(LogFormat::from(LogFormatArg::Json), LogFormat::Json);
        assert_eq!(LogFormat::from(LogFormatArg::Pretty), LogFormat::Pretty);
    }

    #[tokio::test]
    async fn archive_run_writes_entries_and_metrics() -> Result<()> {
        let tree = LogTree::new()?;
        tree.write(
            "2019/2019070412gm-00a9-0000-aa.json",
            &tenhou_log("2019070412gm-00a9-0000-aa", 2, false),
        )?;
        tree.write(
            "2019/2019070513gm-00a9-0000-bb.json",
            &tenhou_log("2019070513gm-00a9-0000-bb", 3, true),
        )?;
        let cli = parse([
            OsString::from("logvault"),
            tree.input().as_os_str().to_owned(),
            tree.output().as_os_str().to_owned(),
            OsString::from("--workers"),
            OsString::from("2"),
        ])?;
        let policy = cli.policy().map_err(|err| anyhow!(err.display_message()))?;
        let metrics = Metrics::new()?;
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let summary = archive(policy, &metrics, cancel_rx)
            .await
            .map_err(|err| anyhow!(err.display_message()))?;
        assert_eq!(summary.archived, 1);
        assert_eq!(summary.rejected.get("offline_player"), Some(&1));
        assert_eq!(archive_entries(&tree.output())?.len(), 1);

        let metrics_path = tree.root().join("metrics.prom");
        write_metrics(&metrics, &metrics_path).map_err(|err| anyhow!(err.display_message()))?;
        let text = fs::read_to_string(&metrics_path)?;
        assert!(text.contains("archive_files_total"));
        Ok(())
    }

    #[test]
    fn unwritable_metrics_file_does_not_fail_the_run() -> Result<()> {
        let tree = LogTree::new()?;
        let metrics = Metrics::new()?;
        let summary = RunSummary::default();

        let blocked = tree.root().join("missing-dir").join("metrics.prom");
        assert!(!publish(&summary, OutputFormat::Json, &metrics, Some(blocked.as_path())));
        assert!(!blocked.exists());

        let writable = tree.root().join("metrics.prom");
        assert!(publish(&summary, OutputFormat::Json, &metrics, Some(writable.as_path())));
        assert!(writable.is_file());
        assert!(publish(&summary, OutputFormat::Table, &metrics, None));
        Ok(())
    }

    #[tokio::test]
    async fn missing_input_root_maps_to_failure_exit() -> Result<()> {
        let tree = LogTree::new()?;
        let policy = ArchivePolicy::new(tree.root().join("absent"), tree.output());
        let metrics = Metrics::new()?;
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let Err(err) = archive(policy, &metrics, cancel_rx).await else {
            return Err(anyhow!("missing input root should fail setup"));
        };
        assert_eq!(err.exit_code(), 3);
        Ok(())
    }
}
