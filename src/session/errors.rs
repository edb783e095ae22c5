//! Append-only error collection shared across the run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, warn};

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum ErrorScope {
    /// Whole workspace (e.g., base enumeration)
    Workspace,
    /// One base
    Base {
        /// Base identifier
        base_id: String,
    },
    /// One table
    Table {
        /// Base identifier
        base_id: String,
        /// Table name
        table: String,
    },
    /// One record
    Record {
        /// Base identifier
        base_id: String,
        /// Table name
        table: String,
        /// Record identifier
        record_id: String,
    },
    /// One attachment
    Attachment {
        /// Base identifier
        base_id: String,
        /// Table name
        table: String,
        /// Record identifier
        record_id: String,
        /// Attachment URL
        url: String,
    },
}

impl ErrorScope {
    /// Table-level scope
    pub fn table(base_id: &str, table: &str) -> Self {
        ErrorScope::Table {
            base_id: base_id.to_string(),
            table: table.to_string(),
        }
    }

    /// Record-level scope
    pub fn record(base_id: &str, table: &str, record_id: &str) -> Self {
        ErrorScope::Record {
            base_id: base_id.to_string(),
            table: table.to_string(),
            record_id: record_id.to_string(),
        }
    }

    /// Whether the scope lies within the given table
    pub fn belongs_to_table(&self, base: &str, name: &str) -> bool {
        match self {
            ErrorScope::Table { base_id, table }
            | ErrorScope::Record { base_id, table, .. }
            | ErrorScope::Attachment { base_id, table, .. } => base_id == base && table == name,
            _ => false,
        }
    }
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Workspace => write!(f, "workspace"),
            ErrorScope::Base { base_id } => write!(f, "base {base_id}"),
            ErrorScope::Table { base_id, table } => write!(f, "base {base_id} / table '{table}'"),
            ErrorScope::Record {
                base_id,
                table,
                record_id,
            } => write!(f, "base {base_id} / table '{table}' / record {record_id}"),
            ErrorScope::Attachment {
                base_id,
                table,
                record_id,
                url,
            } => write!(
                f,
                "base {base_id} / table '{table}' / record {record_id} / attachment {url}"
            ),
        }
    }
}

/// Severity of a collected entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Data preserved but not in its usual shape (e.g., CSV overflow)
    Warning,
    /// Data or work was lost
    Error,
}

/// One collected failure. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
    /// Warning or error
    pub severity: Severity,
    /// Where it happened
    pub scope: ErrorScope,
    /// What was being done (e.g., "fetch records", "csv write")
    pub operation: String,
    /// Failure detail
    pub message: String,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.scope,
            self.operation,
            self.message
        )
    }
}

/// Process-wide, append-only log of failures.
///
/// Cloning yields another handle to the same log; appends from concurrent
/// attachment downloads and sink writes are serialized by an internal mutex.
#[derive(Debug, Clone, Default)]
pub struct ErrorCollector {
    entries: Arc<Mutex<Vec<ErrorEntry>>>,
}

impl ErrorCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ErrorEntry>> {
        // A panic while holding the lock cannot leave a half-pushed entry.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record an error and log it immediately
    pub fn record(&self, scope: ErrorScope, operation: impl Into<String>, message: impl fmt::Display) {
        self.push(Severity::Error, scope, operation.into(), message.to_string());
    }

    /// Record a warning and log it immediately
    pub fn warn(&self, scope: ErrorScope, operation: impl Into<String>, message: impl fmt::Display) {
        self.push(Severity::Warning, scope, operation.into(), message.to_string());
    }

    fn push(&self, severity: Severity, scope: ErrorScope, operation: String, message: String) {
        match severity {
            Severity::Error => error!(scope = %scope, operation = %operation, "{message}"),
            Severity::Warning => warn!(scope = %scope, operation = %operation, "{message}"),
        }
        self.lock().push(ErrorEntry {
            timestamp: Utc::now(),
            severity,
            scope,
            operation,
            message,
        });
    }

    /// Number of entries of any severity
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of entries with the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.lock().iter().filter(|e| e.severity == severity).count()
    }

    /// Copy of all entries in recording order
    pub fn snapshot(&self) -> Vec<ErrorEntry> {
        self.lock().clone()
    }
}
