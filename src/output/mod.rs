//! Format sinks and the per-table writer set
//!
//! Every enabled format gets one [`RecordSink`] per table. The
//! [`FormatWriterSet`] fans each fetched batch out to all of them; a failing
//! sink is reported and never stops its siblings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::fetcher::RecordBatch;
use crate::metrics;

pub mod csv;
pub mod flatten;
pub mod json;
pub mod ndjson;
#[cfg(feature = "parquet")]
pub mod parquet;
pub mod path;
pub mod sqlite;
pub mod yaml;

pub use flatten::{ColumnLayout, OVERFLOW_COLUMN};
pub use path::{sanitize_filename, SlugRegistry, TableTarget};

/// Default buffered-bytes threshold before the parquet sink writes a row group
pub const DEFAULT_PARQUET_MEMORY_CEILING: usize = 64 * 1024 * 1024;

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    SqliteError(String),

    /// Parquet error
    #[error("Parquet error: {0}")]
    ParquetError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Format name not recognized
    #[error("unknown format '{0}' (expected one of: json, yaml, ndjson, csv, sqlite, parquet)")]
    UnknownFormat(String),

    /// Format not compiled into this build
    #[error("format '{0}' is not available in this build")]
    FormatUnavailable(SinkFormat),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Output encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    /// Pretty JSON array
    Json,
    /// YAML block sequence
    Yaml,
    /// One JSON object per line
    Ndjson,
    /// Flattened CSV with an overflow column
    Csv,
    /// One SQLite database per base
    Sqlite,
    /// Columnar Parquet file
    Parquet,
}

impl SinkFormat {
    /// Every format, in output order
    pub const ALL: [SinkFormat; 6] = [
        SinkFormat::Json,
        SinkFormat::Yaml,
        SinkFormat::Ndjson,
        SinkFormat::Csv,
        SinkFormat::Sqlite,
        SinkFormat::Parquet,
    ];

    /// Lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            SinkFormat::Json => "json",
            SinkFormat::Yaml => "yaml",
            SinkFormat::Ndjson => "ndjson",
            SinkFormat::Csv => "csv",
            SinkFormat::Sqlite => "sqlite",
            SinkFormat::Parquet => "parquet",
        }
    }

    /// Directory under `data/`
    pub fn dir_name(&self) -> &'static str {
        self.name()
    }

    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            SinkFormat::Sqlite => "db",
            other => other.name(),
        }
    }

    /// Whether the format is compiled in
    pub fn is_available(&self) -> bool {
        match self {
            SinkFormat::Parquet => cfg!(feature = "parquet"),
            _ => true,
        }
    }

    /// Every compiled-in format
    pub fn available() -> Vec<SinkFormat> {
        Self::ALL.into_iter().filter(SinkFormat::is_available).collect()
    }

    /// Open this format's sink for one table
    ///
    /// # Errors
    /// Returns [`OutputError::FormatUnavailable`] for a format not compiled in,
    /// or the sink's own error if its file cannot be created
    pub fn open(&self, target: &TableTarget, options: &SinkOptions) -> OutputResult<Box<dyn RecordSink>> {
        let path = target.path_for(*self);
        let sink: Box<dyn RecordSink> = match self {
            SinkFormat::Json => Box::new(json::JsonSink::new(&path)?),
            SinkFormat::Yaml => Box::new(yaml::YamlSink::new(&path)?),
            SinkFormat::Ndjson => Box::new(ndjson::NdjsonSink::new(&path)?),
            SinkFormat::Csv => Box::new(csv::CsvSink::new(&path)?),
            SinkFormat::Sqlite => Box::new(sqlite::SqliteSink::new(&path, &target.sqlite_table())?),
            #[cfg(feature = "parquet")]
            SinkFormat::Parquet => Box::new(parquet::ParquetSink::new(
                &path,
                options.parquet_memory_ceiling,
            )?),
            #[cfg(not(feature = "parquet"))]
            SinkFormat::Parquet => return Err(OutputError::FormatUnavailable(*self)),
        };
        #[cfg(not(feature = "parquet"))]
        let _ = options;
        Ok(sink)
    }
}

impl fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SinkFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.name() == lowered)
            .ok_or_else(|| OutputError::UnknownFormat(s.to_string()))
    }
}

/// Sink tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    /// Buffered bytes before the parquet sink writes a row group
    pub parquet_memory_ceiling: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            parquet_memory_ceiling: DEFAULT_PARQUET_MEMORY_CEILING,
        }
    }
}

/// Data kept but reshaped for one record (e.g., CSV overflow)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkWarning {
    /// Affected record
    pub record_id: String,
    /// What happened
    pub message: String,
}

/// Result of closing a sink cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    /// Sink format
    pub format: SinkFormat,
    /// Records persisted
    pub records_written: u64,
    /// File written
    pub path: PathBuf,
}

/// A sink operation that failed
#[derive(Debug)]
pub struct SinkFailure {
    /// Failing sink
    pub format: SinkFormat,
    /// Cause
    pub error: OutputError,
}

/// Streaming writer of one table in one encoding.
///
/// Closing after zero writes, or after a failed write, must leave a
/// syntactically valid file.
pub trait RecordSink: Send {
    /// Encoding of this sink
    fn format(&self) -> SinkFormat;

    /// Append a batch, in record order
    ///
    /// # Returns
    /// Per-record warnings for data that was kept in a degraded shape
    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>>;

    /// Records persisted so far
    fn records_written(&self) -> u64;

    /// Finalize and sync the file
    fn close(self: Box<Self>) -> OutputResult<SinkSummary>;
}

/// Outcome of fanning one batch out
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Warnings per sink
    pub warnings: Vec<(SinkFormat, SinkWarning)>,
    /// Sinks whose write failed
    pub failures: Vec<SinkFailure>,
}

/// All sinks of one table
pub struct FormatWriterSet {
    sinks: Vec<Box<dyn RecordSink>>,
}

impl FormatWriterSet {
    /// Open every requested format for a table.
    ///
    /// # Returns
    /// The sinks that opened, and a failure for each that did not
    pub fn open(
        formats: &[SinkFormat],
        target: &TableTarget,
        options: &SinkOptions,
    ) -> (Self, Vec<SinkFailure>) {
        let mut sinks = Vec::with_capacity(formats.len());
        let mut failures = Vec::new();

        for format in formats {
            match format.open(target, options) {
                Ok(sink) => sinks.push(sink),
                Err(error) => {
                    warn!(format = %format, table = %target.table.name, error = %error, "Failed to open sink");
                    metrics::record_sink_error(format.name());
                    failures.push(SinkFailure {
                        format: *format,
                        error,
                    });
                }
            }
        }

        debug!(table = %target.table.name, sinks = sinks.len(), "Writer set opened");
        (Self { sinks }, failures)
    }

    /// Wrap already-open sinks
    pub fn from_sinks(sinks: Vec<Box<dyn RecordSink>>) -> Self {
        Self { sinks }
    }

    /// Formats of the open sinks
    pub fn formats(&self) -> Vec<SinkFormat> {
        self.sinks.iter().map(|sink| sink.format()).collect()
    }

    /// Number of open sinks
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is open
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Write a batch to every sink. A failed sink stays in the set and
    /// receives later batches.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for sink in &mut self.sinks {
            let format = sink.format();
            match sink.write_batch(batch) {
                Ok(warnings) => outcome
                    .warnings
                    .extend(warnings.into_iter().map(|warning| (format, warning))),
                Err(error) => {
                    metrics::record_sink_error(format.name());
                    outcome.failures.push(SinkFailure { format, error });
                }
            }
        }
        outcome
    }

    /// Close every sink
    ///
    /// # Returns
    /// Summaries of sinks that closed cleanly and failures of the rest
    pub fn close(self) -> (Vec<SinkSummary>, Vec<SinkFailure>) {
        let mut summaries = Vec::with_capacity(self.sinks.len());
        let mut failures = Vec::new();

        for sink in self.sinks {
            let format = sink.format();
            match sink.close() {
                Ok(summary) => {
                    info!(
                        format = %format,
                        records = summary.records_written,
                        path = %summary.path.display(),
                        "Sink closed"
                    );
                    summaries.push(summary);
                }
                Err(error) => {
                    metrics::record_sink_error(format.name());
                    failures.push(SinkFailure { format, error });
                }
            }
        }

        (summaries, failures)
    }
}

/// Create a buffered file, creating its parent directory if needed
pub(crate) fn create_file(path: &Path) -> OutputResult<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
    }

    let file = File::create(path)
        .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;
    Ok(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file))
}

/// Flush a buffered file and sync it to disk
pub(crate) fn finish_file(mut writer: BufWriter<File>) -> OutputResult<()> {
    writer
        .flush()
        .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;

    let file = writer
        .into_inner()
        .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {}", e)))?;

    file.sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Base, Record, Table};
    use tempfile::TempDir;

    struct FailingSink {
        calls: u32,
    }

    impl RecordSink for FailingSink {
        fn format(&self) -> SinkFormat {
            SinkFormat::Sqlite
        }

        fn write_batch(&mut self, _batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
            self.calls += 1;
            Err(OutputError::SqliteError("disk I/O error".into()))
        }

        fn records_written(&self) -> u64 {
            0
        }

        fn close(self: Box<Self>) -> OutputResult<SinkSummary> {
            Ok(SinkSummary {
                format: SinkFormat::Sqlite,
                records_written: 0,
                path: PathBuf::from(format!("calls-{}", self.calls)),
            })
        }
    }

    fn batch() -> RecordBatch {
        RecordBatch {
            base_id: "app1".into(),
            table_id: "tbl1".into(),
            page: 1,
            records: vec![Record::new("rec1", Default::default())],
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<SinkFormat>().unwrap(), SinkFormat::Json);
        assert_eq!(" ndjson ".parse::<SinkFormat>().unwrap(), SinkFormat::Ndjson);
        assert!(matches!(
            "xml".parse::<SinkFormat>(),
            Err(OutputError::UnknownFormat(_))
        ));
        assert_eq!(SinkFormat::Sqlite.extension(), "db");
    }

    #[test]
    fn test_failing_sink_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        let target = TableTarget::new(
            dir.path().to_path_buf(),
            Base::new("app1", "CRM"),
            Table::new("tbl1", "Deals"),
            "Deals",
        );
        let json = SinkFormat::Json.open(&target, &SinkOptions::default()).unwrap();
        let mut set = FormatWriterSet::from_sinks(vec![Box::new(FailingSink { calls: 0 }), json]);

        let first = set.write_batch(&batch());
        let second = set.write_batch(&batch());
        assert_eq!(first.failures.len(), 1);
        assert_eq!(second.failures.len(), 1);
        assert_eq!(first.failures[0].format, SinkFormat::Sqlite);

        let (summaries, failures) = set.close();
        assert!(failures.is_empty());
        let json = summaries.iter().find(|s| s.format == SinkFormat::Json).unwrap();
        assert_eq!(json.records_written, 2);
        let failing = summaries.iter().find(|s| s.format == SinkFormat::Sqlite).unwrap();
        assert_eq!(failing.path, PathBuf::from("calls-2"));
    }
}
