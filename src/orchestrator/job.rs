//! Per-table job state and progress tracking

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::output::SinkFormat;
use crate::Table;

/// Table state: `Pending → Fetching → (Completed | Failed | Interrupted)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    /// Not started yet
    #[default]
    Pending,
    /// Pages are being fetched and written
    Fetching,
    /// Fetch exhausted without a fatal error
    Completed,
    /// Fetch ended with a fatal error
    Failed,
    /// Interruption observed at a batch boundary
    Interrupted,
}

impl TableStatus {
    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TableStatus::Completed | TableStatus::Failed | TableStatus::Interrupted
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: TableStatus) -> bool {
        matches!(
            (self, next),
            (TableStatus::Pending, TableStatus::Fetching)
                | (
                    TableStatus::Fetching,
                    TableStatus::Completed | TableStatus::Failed | TableStatus::Interrupted
                )
        )
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TableStatus::Pending => "PENDING",
            TableStatus::Fetching => "FETCHING",
            TableStatus::Completed => "COMPLETED",
            TableStatus::Failed => "FAILED",
            TableStatus::Interrupted => "INTERRUPTED",
        };
        f.write_str(label)
    }
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal table transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state
    pub from: TableStatus,
    /// Requested state
    pub to: TableStatus,
}

/// Progress of one table within the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableProgress {
    /// Owning base identifier
    pub base_id: String,
    /// Source table
    pub table: Table,
    /// Filesystem slug
    pub slug: String,
    /// Current state
    pub status: TableStatus,
    /// Pages received
    pub pages: u32,
    /// Records received from the fetcher
    pub records_fetched: u64,
    /// Records persisted, per sink
    pub records_written: BTreeMap<SinkFormat, u64>,
    /// Attachments written to disk this run
    pub attachments_downloaded: u64,
    /// Attachments already present and skipped
    pub attachments_skipped: u64,
    /// Attachments that failed
    pub attachments_failed: u64,
    /// Reason for a failed or interrupted table
    pub reason: Option<String>,
}

impl TableProgress {
    /// New pending table
    pub fn new(base_id: impl Into<String>, table: Table, slug: impl Into<String>) -> Self {
        Self {
            base_id: base_id.into(),
            table,
            slug: slug.into(),
            status: TableStatus::Pending,
            pages: 0,
            records_fetched: 0,
            records_written: BTreeMap::new(),
            attachments_downloaded: 0,
            attachments_skipped: 0,
            attachments_failed: 0,
            reason: None,
        }
    }

    /// Move to the next state
    ///
    /// # Errors
    /// Returns [`TransitionError`] for anything but the documented edges
    pub fn transition(&mut self, next: TableStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Whether every sink that closed wrote exactly the fetched record count
    pub fn sinks_consistent(&self) -> bool {
        self.records_written
            .values()
            .all(|written| *written == self.records_fetched)
    }
}
