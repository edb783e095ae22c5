//! CLI command implementations

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::{BackupConfig, CONCURRENCY_RANGE};
use crate::output::SinkFormat;

pub mod backup;
pub mod dry_run;
pub mod error;
pub mod verify;

pub use backup::{exit_code, BackupArgs};
pub use dry_run::DryRunArgs;
pub use error::CliError;
pub use verify::VerifyArgs;

/// Parse and validate the attachment concurrency
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !CONCURRENCY_RANGE.contains(&value) {
        return Err(format!(
            "concurrency {value} is outside {}..={}",
            CONCURRENCY_RANGE.start(),
            CONCURRENCY_RANGE.end()
        ));
    }
    Ok(value)
}

/// Airtable workspace backup CLI
#[derive(Parser, Debug)]
#[command(name = "airtable-backup")]
#[command(about = "Back up every base, table, record and attachment of an Airtable workspace", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute (defaults to `backup`)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Log at debug level
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// The requested command, `backup` with default arguments when omitted
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Backup(BackupArgs::default()))
    }
}

/// CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Back up the whole workspace
    Backup(BackupArgs),

    /// List what would be backed up without writing anything
    DryRun(DryRunArgs),

    /// Check credentials, output directory creation and compiled formats
    Verify(VerifyArgs),
}

/// Settings shared by commands that plan a backup
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Output directory (default: ./airtable_backup_{timestamp})
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Comma-separated formats: json,yaml,ndjson,csv,sqlite,parquet (default: all available)
    #[arg(long, value_delimiter = ',')]
    pub formats: Vec<SinkFormat>,

    /// Minimum spacing between API requests in milliseconds (default: 100)
    #[arg(long)]
    pub request_interval_ms: Option<u64>,

    /// Maximum number of retries for failed requests (default: 3, range: 1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,
}

impl ConfigArgs {
    /// Overlay the flags that were given
    pub fn apply(&self, config: &mut BackupConfig) {
        if let Some(output) = &self.output {
            config.output_dir = Some(output.clone());
        }
        if !self.formats.is_empty() {
            let mut formats = self.formats.clone();
            formats.sort();
            formats.dedup();
            config.formats = formats;
        }
        if let Some(ms) = self.request_interval_ms {
            config.min_request_interval = std::time::Duration::from_millis(ms);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
    }

    /// Environment configuration with these flags applied
    ///
    /// # Errors
    /// Returns [`CliError::Config`] if the environment or a flag is invalid
    pub fn load(&self) -> Result<BackupConfig, CliError> {
        let mut config = BackupConfig::from_env()?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    #[default]
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
