//! CLI error types and conversions

use crate::config::ConfigError;
use crate::fetcher::FetcherError;
use crate::metrics::MetricsError;
use crate::orchestrator::OrchestratorError;
use crate::report::ReportError;
use crate::session::SessionError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Orchestrator could not be built
    #[error("setup error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// API request failed
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),

    /// Output tree could not be created
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Metadata or report could not be written
    #[error("report error: {0}")]
    Report(#[from] ReportError),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more verification checks failed
    #[error("verification failed: {0}")]
    Verification(String),
}
