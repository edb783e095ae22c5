//! Main entry point for the airtable-backup CLI

use airtable_backup::cli::{exit_code, Cli, Commands};
use airtable_backup::shutdown::{install_ctrl_c_handler, ShutdownCoordinator};
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing: console output (JSON with `LOG_FORMAT=json`) plus an
/// optional plain-text log file
fn init_tracing(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_level = if verbose {
        "airtable_backup=debug"
    } else {
        "airtable_backup=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };
    let json_layer = json_format.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json_format).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let shutdown = ShutdownCoordinator::shared();

    match cli.command() {
        Commands::Backup(args) => {
            let config = args.load_config()?;
            let cwd = std::env::current_dir().context("No current directory")?;
            let layout = config.layout(&cwd, &Local::now());
            init_tracing(cli.verbose, Some(&layout.log_file()))?;
            install_ctrl_c_handler(shutdown.clone());

            let status = args
                .execute(&config, layout, cli.output_format, shutdown)
                .await?;
            Ok(exit_code(status))
        }
        Commands::DryRun(args) => {
            init_tracing(cli.verbose, None)?;
            args.execute(cli.output_format).await?;
            Ok(0)
        }
        Commands::Verify(args) => {
            init_tracing(cli.verbose, None)?;
            args.execute(cli.output_format).await?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
