//! Dry-run command: list what a backup would cover

use chrono::Local;
use clap::Args;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::{CliError, ConfigArgs, OutputFormat};
use crate::fetcher::WorkspaceSource;
use crate::orchestrator::build_source;
use crate::output::SinkFormat;

/// Table names shown per base before eliding the rest
const PREVIEW_TABLES: usize = 3;

/// Dry-run command arguments
#[derive(Args, Debug, Clone, Default)]
pub struct DryRunArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub config: ConfigArgs,
}

/// Tables of one base, or why they could not be listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasePlan {
    /// Base identifier
    pub id: String,
    /// Base display name
    pub name: String,
    /// Table names in API order
    pub tables: Vec<String>,
    /// Listing failure
    pub error: Option<String>,
}

/// What a backup would do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunPlan {
    /// Directory the backup would write to
    pub output_dir: PathBuf,
    /// Enabled sinks
    pub formats: Vec<SinkFormat>,
    /// Every visible base
    pub bases: Vec<BasePlan>,
}

impl DryRunPlan {
    /// Enumerate bases and tables without fetching records
    ///
    /// # Errors
    /// Returns [`CliError::Fetcher`] if the bases cannot be listed
    pub async fn collect(
        source: &dyn WorkspaceSource,
        output_dir: PathBuf,
        formats: Vec<SinkFormat>,
    ) -> Result<Self, CliError> {
        let mut bases = Vec::new();
        for base in source.list_bases().await? {
            let (tables, error) = match source.list_tables(&base).await {
                Ok(tables) => (tables.into_iter().map(|t| t.name).collect(), None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            };
            bases.push(BasePlan {
                id: base.id,
                name: base.name,
                tables,
                error,
            });
        }
        Ok(Self {
            output_dir,
            formats,
            bases,
        })
    }

    /// Human-readable listing
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Found {} bases:", self.bases.len());
        for base in &self.bases {
            let _ = writeln!(out, "- {} ({})", base.name, base.id);
            if let Some(error) = &base.error {
                let _ = writeln!(out, "    could not list tables: {error}");
                continue;
            }
            let _ = writeln!(out, "    {} tables", base.tables.len());
            for name in base.tables.iter().take(PREVIEW_TABLES) {
                let _ = writeln!(out, "    - {name}");
            }
            if base.tables.len() > PREVIEW_TABLES {
                let _ = writeln!(out, "    ... and {} more", base.tables.len() - PREVIEW_TABLES);
            }
        }
        let _ = writeln!(out, "\nOutput directory: {}", self.output_dir.display());
        let formats: Vec<&str> = self.formats.iter().map(SinkFormat::name).collect();
        let _ = writeln!(out, "Formats: {}", formats.join(", "));
        out
    }
}

impl DryRunArgs {
    /// Execute the dry run
    ///
    /// # Errors
    /// Returns [`CliError`] if configuration is invalid or the API is unreachable
    pub async fn execute(&self, output_format: OutputFormat) -> Result<(), CliError> {
        let config = self.config.load()?;
        let source = build_source(&config)?;
        let cwd = std::env::current_dir()
            .map_err(|e| CliError::InvalidArgument(format!("No current directory: {e}")))?;
        let layout = config.layout(&cwd, &Local::now());

        let plan =
            DryRunPlan::collect(&source, layout.root().to_path_buf(), config.formats.clone())
                .await?;

        match output_format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&plan)
                    .map_err(|e| CliError::InvalidArgument(e.to_string()))?
            ),
            OutputFormat::Human => print!("{}", plan.render()),
        }
        Ok(())
    }
}
