//! Backup orchestration
//!
//! The orchestrator walks every base and table in API order and drives each
//! table through its state machine:
//!
//! 1. **Pending**: registered when the base's tables are listed
//! 2. **Fetching**: sinks opened, pages streamed, attachments downloaded per batch
//! 3. **Completed / Failed / Interrupted**: sinks closed, counts recorded
//!
//! A fatal fetch error ends only the affected table. An interrupt is observed
//! at batch boundaries; the current table is closed cleanly and the remaining
//! ones stay `Pending`.
//!
//! # Components
//!
//! - [`executor`] - [`BackupOrchestrator`] and the per-table loop
//! - [`job`] - Table state machine and progress counters
//! - [`progress`] - Terminal spinners

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::fetcher::FetcherError;

pub mod executor;
pub mod job;
pub mod progress;

pub use executor::{build_source, BackupOrchestrator};
pub use job::{TableProgress, TableStatus, TransitionError};
pub use progress::BackupProgress;

/// Errors while assembling an orchestrator
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP stack could not be built
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Endpoint roots could not be parsed
    #[error(transparent)]
    Fetcher(#[from] FetcherError),
}
