//! Backup command implementation

use clap::Args;
use std::net::SocketAddr;
use tracing::info;

use super::{parse_concurrency, CliError, ConfigArgs, OutputFormat};
use crate::config::BackupConfig;
use crate::metrics;
use crate::orchestrator::{BackupOrchestrator, BackupProgress};
use crate::report::{self, WrittenReport};
use crate::session::{RunStatus, SessionLayout};
use crate::shutdown::{SharedShutdown, FORCED_EXIT_CODE};

/// Process exit code of a finished run: 0 completed, 130 interrupted, 1 otherwise
pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::Interrupted => FORCED_EXIT_CODE,
        RunStatus::Failed | RunStatus::Running => 1,
    }
}

/// Backup command arguments
#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub config: ConfigArgs,

    /// Skip attachment downloads
    #[arg(long, default_value_t = false)]
    pub no_attachments: bool,

    /// Download attachments again even if the file already exists
    #[arg(long, default_value_t = false)]
    pub redownload_attachments: bool,

    /// Concurrent attachment downloads (default: 4, max: 32)
    #[arg(long, value_parser = parse_concurrency)]
    pub attachment_concurrency: Option<usize>,

    /// Serve Prometheus metrics on this address (e.g., 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Disable progress spinners
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

impl BackupArgs {
    /// Overlay the flags that were given
    pub fn apply(&self, config: &mut BackupConfig) {
        self.config.apply(config);
        if self.no_attachments {
            config.download_attachments = false;
        }
        if self.redownload_attachments {
            config.redownload_existing = true;
        }
        if let Some(concurrency) = self.attachment_concurrency {
            config.attachment_concurrency = concurrency;
        }
    }

    /// Configuration for this run, token required
    ///
    /// # Errors
    /// Returns [`CliError::Config`] if the token is missing or a value is invalid
    pub fn load_config(&self) -> Result<BackupConfig, CliError> {
        let mut config = BackupConfig::from_env()?;
        self.apply(&mut config);
        config.validate()?;
        config.require_token()?;
        Ok(config)
    }

    /// Run the backup and write its metadata and report.
    ///
    /// # Returns
    /// Terminal run status; the report is written whatever it is
    ///
    /// # Errors
    /// Returns [`CliError`] if the run cannot start or its report cannot be written
    pub async fn execute(
        &self,
        config: &BackupConfig,
        layout: SessionLayout,
        output_format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunStatus, CliError> {
        if let Some(addr) = self.metrics_addr {
            metrics::init_metrics(addr)?;
        }

        let progress =
            BackupProgress::new(!self.no_progress && output_format == OutputFormat::Human);
        let orchestrator =
            BackupOrchestrator::from_config(config, layout, shutdown)?.with_progress(progress);

        info!(config = ?config, "Backup configuration");
        let session = orchestrator.run().await?;
        let written = report::write_outputs(session.layout(), &session)?;

        match output_format {
            OutputFormat::Json => output_json(&written),
            OutputFormat::Human => output_human(&written),
        }
        Ok(session.status())
    }
}

fn output_json(written: &WrittenReport) {
    let metadata = &written.metadata;
    let output = serde_json::json!({
        "success": metadata.status == RunStatus::Completed,
        "status": metadata.status,
        "output_dir": metadata.output_dir.display().to_string(),
        "statistics": metadata.statistics,
        "report": written.files.report.display().to_string(),
        "metadata": written.files.metadata_json.display().to_string(),
    });
    println!("{output}");
}

fn output_human(written: &WrittenReport) {
    let metadata = &written.metadata;
    let stats = &metadata.statistics;
    match metadata.status {
        RunStatus::Completed => println!("\nBackup completed!"),
        RunStatus::Interrupted => println!("\nBackup interrupted, partial results were saved."),
        _ => eprintln!("\nBackup failed!"),
    }
    println!("Output: {}", metadata.output_dir.display());
    println!(
        "Bases: {}  Tables: {}  Records: {}  Attachments: {}",
        stats.bases, stats.tables, stats.records, stats.attachments
    );
    if stats.tables_failed > 0 {
        println!("Failed tables: {}", stats.tables_failed);
    }
    if stats.errors > 0 {
        println!("Errors: {} (see {})", stats.errors, written.files.report.display());
    } else {
        println!("Report: {}", written.files.report.display());
    }
}
