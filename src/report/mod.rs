//! Backup metadata and human-readable report
//!
//! [`generate`] is a pure function of the session, so it can run after a
//! completed, interrupted or failed run alike. [`write_outputs`] persists the
//! results under the session's `metadata/` and `reports/` directories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::orchestrator::TableStatus;
use crate::output::SinkFormat;
use crate::session::{BackupSession, ErrorEntry, RunStatus, SessionLayout, Severity};

mod writer;

pub use writer::{write_outputs, ReportFiles, WrittenReport};

/// Report errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Metadata could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Run-wide counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Bases enumerated
    pub bases: usize,
    /// Tables listed across all visited bases
    pub tables: usize,
    /// Records fetched
    pub records: u64,
    /// Attachments written in this run
    pub attachments: u64,
    /// Attachments already on disk
    pub attachments_skipped: u64,
    /// Error entries
    pub errors: usize,
    /// Warning entries
    pub warnings: usize,
    /// Tables that completed
    pub tables_completed: usize,
    /// Tables that ended with a fatal fetch error
    pub tables_failed: usize,
    /// Tables cut short by an interrupt
    pub tables_interrupted: usize,
    /// Tables never started
    pub tables_pending: usize,
}

/// Outcome of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSummary {
    /// Base identifier
    pub base_id: String,
    /// Base display name
    pub base_name: String,
    /// Table identifier
    pub table_id: String,
    /// Table display name
    pub table_name: String,
    /// Filesystem-safe table name
    pub slug: String,
    /// Terminal state
    pub status: TableStatus,
    /// Pages received
    pub pages: u32,
    /// Records fetched
    pub records_fetched: u64,
    /// Records written per sink
    pub records_written: BTreeMap<SinkFormat, u64>,
    /// Attachments written
    pub attachments_downloaded: u64,
    /// Attachments that failed
    pub attachments_failed: u64,
    /// Error entries scoped to this table
    pub errors: usize,
    /// Why the table did not complete
    pub reason: Option<String>,
}

/// Machine-readable session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Timestamp used in the output directory name
    pub backup_date: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run was finalized
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal run state
    pub status: RunStatus,
    /// Session root
    pub output_dir: PathBuf,
    /// Enabled sinks
    pub formats: Vec<SinkFormat>,
    /// Run-wide counts
    pub statistics: Statistics,
    /// Per-table outcomes in enumeration order
    pub tables: Vec<TableSummary>,
    /// Every collected error and warning
    pub errors: Vec<ErrorEntry>,
    /// Base id → name
    pub bases: BTreeMap<String, String>,
}

/// Original → sanitized names of one base
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseName {
    /// Name in Airtable
    pub original_name: String,
    /// Name used on disk
    pub sanitized_name: String,
}

/// Original → sanitized names of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableName {
    /// Base identifier
    pub base_id: String,
    /// Base display name
    pub base_name: String,
    /// Table identifier
    pub table_id: String,
    /// Name in Airtable
    pub original_name: String,
    /// Name used on disk
    pub sanitized_name: String,
}

/// Lookup from output file names back to Airtable names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMapping {
    /// Timestamp used in the output directory name
    pub backup_date: String,
    /// Keyed by base id
    pub bases: BTreeMap<String, BaseName>,
    /// Keyed by `{base_id}_{table_id}`
    pub tables: BTreeMap<String, TableName>,
}

impl NameMapping {
    /// Mapping of every base and listed table in the session
    pub fn from_session(session: &BackupSession) -> Self {
        let mut bases = BTreeMap::new();
        let mut tables = BTreeMap::new();
        for base in session.bases() {
            bases.insert(
                base.base.id.clone(),
                BaseName {
                    original_name: base.base.name.clone(),
                    sanitized_name: base.slug.clone(),
                },
            );
            for table in &base.tables {
                tables.insert(
                    format!("{}_{}", base.base.id, table.table.id),
                    TableName {
                        base_id: base.base.id.clone(),
                        base_name: base.base.name.clone(),
                        table_id: table.table.id.clone(),
                        original_name: table.table.name.clone(),
                        sanitized_name: table.slug.clone(),
                    },
                );
            }
        }
        Self {
            backup_date: session.layout().timestamp().to_string(),
            bases,
            tables,
        }
    }
}

/// Build the metadata and the report text for a session
pub fn generate(session: &BackupSession) -> (BackupMetadata, String) {
    let metadata = build_metadata(session);
    let report = render_report(session, &metadata);
    (metadata, report)
}

fn build_metadata(session: &BackupSession) -> BackupMetadata {
    let errors = session.errors().snapshot();

    let mut tables = Vec::new();
    for base in session.bases() {
        for table in &base.tables {
            let table_errors = errors
                .iter()
                .filter(|e| e.severity == Severity::Error)
                .filter(|e| e.scope.belongs_to_table(&base.base.id, &table.table.name))
                .count();
            tables.push(TableSummary {
                base_id: base.base.id.clone(),
                base_name: base.base.name.clone(),
                table_id: table.table.id.clone(),
                table_name: table.table.name.clone(),
                slug: table.slug.clone(),
                status: table.status,
                pages: table.pages,
                records_fetched: table.records_fetched,
                records_written: table.records_written.clone(),
                attachments_downloaded: table.attachments_downloaded,
                attachments_failed: table.attachments_failed,
                errors: table_errors,
                reason: table.reason.clone(),
            });
        }
    }

    let statistics = Statistics {
        bases: session.bases().len(),
        tables: tables.len(),
        records: session.total_records(),
        attachments: session.total_attachments(),
        attachments_skipped: session.tables().map(|t| t.attachments_skipped).sum(),
        errors: errors
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .count(),
        warnings: errors
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .count(),
        tables_completed: session.tables_with_status(TableStatus::Completed),
        tables_failed: session.tables_with_status(TableStatus::Failed),
        tables_interrupted: session.tables_with_status(TableStatus::Interrupted),
        tables_pending: session.tables_with_status(TableStatus::Pending),
    };

    BackupMetadata {
        backup_date: session.layout().timestamp().to_string(),
        started_at: session.started_at(),
        finished_at: session.finished_at(),
        status: session.status(),
        output_dir: session.layout().root().to_path_buf(),
        formats: session.formats().to_vec(),
        statistics,
        tables,
        errors,
        bases: session
            .bases()
            .iter()
            .map(|b| (b.base.id.clone(), b.base.name.clone()))
            .collect(),
    }
}

fn plural(count: impl Into<u64>, word: &str) -> String {
    let count = count.into();
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

fn dir_line(label: &str, dir: &Path) -> String {
    format!("- {}: {}/\n", label, dir.display())
}

fn render_report(session: &BackupSession, metadata: &BackupMetadata) -> String {
    let stats = &metadata.statistics;
    let layout: &SessionLayout = session.layout();
    let mut out = String::new();

    out.push_str("Airtable Backup Report\n");
    out.push_str("======================\n\n");
    out.push_str(&format!("Backup Date: {}\n", metadata.backup_date));
    out.push_str(&format!("Status: {}\n", metadata.status));
    out.push_str(&format!("Started: {}\n", metadata.started_at.to_rfc3339()));
    match metadata.finished_at {
        Some(finished) => {
            let elapsed = (finished - metadata.started_at).num_seconds();
            out.push_str(&format!("Finished: {} ({elapsed}s)\n", finished.to_rfc3339()));
        }
        None => out.push_str("Finished: not finalized\n"),
    }
    out.push_str(&format!("Output Directory: {}\n", layout.root().display()));
    out.push('\n');

    out.push_str(&format!(
        "Summary: {} / {} / {} / {}\n",
        plural(stats.bases as u64, "base"),
        plural(stats.tables as u64, "table"),
        plural(stats.records, "record"),
        plural(stats.attachments, "attachment")
    ));
    out.push('\n');

    out.push_str("Statistics:\n");
    out.push_str(&format!("- Bases: {}\n", stats.bases));
    out.push_str(&format!("- Tables: {}\n", stats.tables));
    out.push_str(&format!("- Records: {}\n", stats.records));
    out.push_str(&format!(
        "- Attachments: {} downloaded, {} already present\n",
        stats.attachments, stats.attachments_skipped
    ));
    out.push_str(&format!("- Errors: {}\n", stats.errors));
    out.push_str(&format!("- Warnings: {}\n", stats.warnings));
    out.push('\n');

    out.push_str("Output Formats:\n");
    for format in &metadata.formats {
        out.push_str(&dir_line(
            &format.name().to_uppercase(),
            &layout.format_dir(*format),
        ));
    }
    out.push('\n');
    out.push_str(&dir_line("Attachments", &layout.attachments_dir()));
    out.push_str(&dir_line("Logs", &layout.logs_dir()));
    out.push_str(&dir_line("Metadata", &layout.metadata_dir()));
    out.push('\n');

    render_tables(&mut out, session, metadata);

    if !metadata.errors.is_empty() {
        out.push_str("\nErrors:\n");
        for entry in &metadata.errors {
            out.push_str(&format!("- {entry}\n"));
        }
    }
    out
}

fn render_tables(out: &mut String, session: &BackupSession, metadata: &BackupMetadata) {
    let mut complete = Vec::new();
    let mut partial = Vec::new();
    let mut failed = Vec::new();
    let mut not_started = Vec::new();

    for table in &metadata.tables {
        let label = format!("{} / {}", table.base_name, table.table_name);
        match table.status {
            TableStatus::Completed if table.errors == 0 => {
                complete.push(format!("{label}: {}", plural(table.records_fetched, "record")));
            }
            TableStatus::Completed => partial.push(format!(
                "{label}: {}, {}",
                plural(table.records_fetched, "record"),
                plural(table.errors as u64, "error")
            )),
            TableStatus::Interrupted => partial.push(format!(
                "{label}: {} before interruption",
                plural(table.records_fetched, "record")
            )),
            TableStatus::Failed => failed.push(format!(
                "{label}: {} ({})",
                plural(table.records_fetched, "record"),
                table.reason.as_deref().unwrap_or("unknown error")
            )),
            TableStatus::Pending | TableStatus::Fetching => {
                not_started.push(format!("{label}: not started"));
            }
        }
    }

    for base in session.bases() {
        match (&base.error, base.visited) {
            (Some(error), _) => failed.push(format!("{}: table listing failed ({error})", base.base.name)),
            (None, false) => not_started.push(format!("{}: base not visited", base.base.name)),
            (None, true) => {}
        }
    }

    out.push_str("Tables:\n");
    for (title, lines) in [
        ("Complete", complete),
        ("Partial", partial),
        ("Failed", failed),
        ("Not started", not_started),
    ] {
        out.push_str(&format!("{title} ({}):\n", lines.len()));
        for line in lines {
            out.push_str(&format!("  - {line}\n"));
        }
    }
}
