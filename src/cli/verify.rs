//! Verify command: check that a backup could run

use chrono::Utc;
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use super::{CliError, OutputFormat};
use crate::config::BackupConfig;
use crate::fetcher::WorkspaceSource;
use crate::orchestrator::build_source;
use crate::output::SinkFormat;
use crate::session::SessionLayout;

/// Bases listed by the connectivity check
const SAMPLE_BASES: usize = 3;

/// Verify command arguments
#[derive(Args, Debug, Clone, Default)]
pub struct VerifyArgs {}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    /// What was checked
    pub name: String,
    /// Whether it passed
    pub passed: bool,
    /// Details or failure reason
    pub detail: String,
}

impl Check {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// List a few bases to prove the token and endpoints work
pub async fn check_api(source: &dyn WorkspaceSource) -> Check {
    match source.list_bases().await {
        Ok(bases) => {
            let sample: Vec<String> = bases
                .iter()
                .take(SAMPLE_BASES)
                .map(|b| format!("{} ({})", b.name, b.id))
                .collect();
            Check::pass(
                "api",
                format!("{} bases visible: {}", bases.len(), sample.join(", ")),
            )
        }
        Err(e) => Check::fail("api", e.to_string()),
    }
}

/// Create a full output tree in a scratch directory, then remove it
pub fn check_layout(formats: &[SinkFormat]) -> Check {
    let scratch = match tempfile::TempDir::new() {
        Ok(dir) => dir,
        Err(e) => return Check::fail("layout", format!("no temp dir: {e}")),
    };
    let layout = SessionLayout::timestamped(scratch.path(), &Utc::now());
    match layout.create(formats) {
        Ok(()) => Check::pass("layout", "output directories can be created"),
        Err(e) => Check::fail("layout", e.to_string()),
    }
}

/// Which sinks are compiled into this build
pub fn check_formats() -> Check {
    let lines: Vec<String> = SinkFormat::ALL
        .iter()
        .map(|format| {
            let state = if format.is_available() { "available" } else { "not compiled in" };
            format!("{format}: {state}")
        })
        .collect();
    Check::pass("formats", lines.join(", "))
}

impl VerifyArgs {
    /// Run every check
    ///
    /// # Errors
    /// Returns [`CliError::Verification`] naming the checks that failed
    pub async fn execute(&self, output_format: OutputFormat) -> Result<(), CliError> {
        let config = BackupConfig::from_env()?;

        let mut checks = Vec::new();
        match build_source(&config) {
            Ok(source) => checks.push(check_api(&source).await),
            Err(e) => checks.push(Check::fail("api", e.to_string())),
        }
        checks.push(check_layout(&config.formats));
        checks.push(check_formats());

        for check in &checks {
            if check.passed {
                info!(check = %check.name, detail = %check.detail, "Check passed");
            } else {
                warn!(check = %check.name, detail = %check.detail, "Check failed");
            }
        }

        match output_format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "success": checks.iter().all(|c| c.passed),
                    "checks": checks,
                });
                println!("{output}");
            }
            OutputFormat::Human => {
                for check in &checks {
                    let mark = if check.passed { "OK  " } else { "FAIL" };
                    println!("[{mark}] {}: {}", check.name, check.detail);
                }
            }
        }

        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CliError::Verification(failed.join(", ")))
        }
    }
}
