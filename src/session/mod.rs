//! Backup session aggregate
//!
//! - [`BackupSession`] - run-wide state: timing, per-table progress, errors, terminal status
//! - [`SessionLayout`] - output directory tree
//! - [`ErrorCollector`] - append-only failure log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

pub mod errors;
pub mod layout;

pub use errors::{ErrorCollector, ErrorEntry, ErrorScope, Severity};
pub use layout::SessionLayout;

use crate::orchestrator::job::{TableProgress, TableStatus};
use crate::output::SinkFormat;
use crate::Base;

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The output tree could not be created
    #[error("failed to create directory {}: {message}", path.display())]
    CreateDir {
        /// Directory that failed
        path: PathBuf,
        /// OS error
        message: String,
    },
}

/// Run state: `Running → Completed | Failed | Interrupted`, set once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Still running
    Running,
    /// Every base was visited
    Completed,
    /// The workspace could not be enumerated
    Failed,
    /// Interruption observed
    Interrupted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Interrupted => "INTERRUPTED",
        };
        f.write_str(label)
    }
}

/// Progress of one base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseProgress {
    /// Source base
    pub base: Base,
    /// Filesystem-safe base name
    pub slug: String,
    /// Whether its tables were listed
    pub visited: bool,
    /// Table listing failure, if any
    pub error: Option<String>,
    /// Tables in API order
    pub tables: Vec<TableProgress>,
}

/// Root aggregate of one backup run
#[derive(Debug, Clone)]
pub struct BackupSession {
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    layout: SessionLayout,
    formats: Vec<SinkFormat>,
    status: RunStatus,
    bases: Vec<BaseProgress>,
    errors: ErrorCollector,
}

impl BackupSession {
    /// Start a session
    pub fn new(layout: SessionLayout, formats: Vec<SinkFormat>, errors: ErrorCollector) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            layout,
            formats,
            status: RunStatus::Running,
            bases: Vec::new(),
            errors,
        }
    }

    /// Override the start time (used when the layout timestamp was taken earlier)
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Stamp the terminal status and end time. Only the first call has effect.
    pub fn finalize(&mut self, status: RunStatus) {
        if self.status != RunStatus::Running {
            warn!(
                current = %self.status,
                requested = %status,
                "Session already finalized, ignoring"
            );
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        info!(
            status = %status,
            records = self.total_records(),
            errors = self.errors.count(Severity::Error),
            "Backup session finalized"
        );
    }

    /// Register a base before visiting it
    pub fn add_base(&mut self, base: Base, slug: String) -> usize {
        self.bases.push(BaseProgress {
            base,
            slug,
            visited: false,
            error: None,
            tables: Vec::new(),
        });
        self.bases.len() - 1
    }

    /// Mutable access to a base
    pub fn base_mut(&mut self, index: usize) -> Option<&mut BaseProgress> {
        self.bases.get_mut(index)
    }

    /// Mutable access to a table
    pub fn table_mut(&mut self, base: usize, table: usize) -> Option<&mut TableProgress> {
        self.bases.get_mut(base)?.tables.get_mut(table)
    }

    /// When the run started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the run was finalized
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Output layout
    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    /// Enabled formats
    pub fn formats(&self) -> &[SinkFormat] {
        &self.formats
    }

    /// Current run status
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Bases in enumeration order
    pub fn bases(&self) -> &[BaseProgress] {
        &self.bases
    }

    /// Shared error log
    pub fn errors(&self) -> &ErrorCollector {
        &self.errors
    }

    /// Iterate all tables
    pub fn tables(&self) -> impl Iterator<Item = &TableProgress> {
        self.bases.iter().flat_map(|base| base.tables.iter())
    }

    /// Records fetched across all tables
    pub fn total_records(&self) -> u64 {
        self.tables().map(|t| t.records_fetched).sum()
    }

    /// Attachments written across all tables
    pub fn total_attachments(&self) -> u64 {
        self.tables().map(|t| t.attachments_downloaded).sum()
    }

    /// Number of tables in the given state
    pub fn tables_with_status(&self, status: TableStatus) -> usize {
        self.tables().filter(|t| t.status == status).count()
    }
}
