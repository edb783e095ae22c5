//! Parquet writer
//!
//! Rows are projected with the same column layout and overflow policy as the
//! CSV sink and buffered in memory. A row group is written whenever the
//! estimated buffered size reaches the memory ceiling, and the footer on close.

use arrow_array::{ArrayRef, RecordBatch as ArrowBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::flatten::ColumnLayout;
use super::{OutputError, OutputResult, RecordSink, SinkFormat, SinkSummary, SinkWarning};
use crate::fetcher::RecordBatch;

const CELL_OVERHEAD_BYTES: usize = 8;

fn parquet_err<E: std::fmt::Display>(context: &'static str) -> impl Fn(E) -> OutputError {
    move |e| OutputError::ParquetError(format!("{}: {}", context, e))
}

struct Open {
    layout: ColumnLayout,
    schema: SchemaRef,
    writer: ArrowWriter<File>,
}

/// Parquet sink with a bounded row buffer
pub struct ParquetSink {
    path: PathBuf,
    file: Option<File>,
    open: Option<Open>,
    rows: Vec<Vec<Option<String>>>,
    buffered_bytes: usize,
    memory_ceiling: usize,
    row_groups: usize,
    /// Rows that reached a written row group; buffered rows are not counted
    records_written: u64,
}

impl ParquetSink {
    /// Create the file; the schema is fixed by the first non-empty batch
    pub fn new(path: &Path, memory_ceiling: usize) -> OutputResult<Self> {
        info!("Creating Parquet writer: path={}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }
        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            open: None,
            rows: Vec::new(),
            buffered_bytes: 0,
            memory_ceiling: memory_ceiling.max(1),
            row_groups: 0,
            records_written: 0,
        })
    }

    /// Row groups written so far
    pub fn row_groups(&self) -> usize {
        self.row_groups
    }

    fn start(&mut self, layout: ColumnLayout) -> OutputResult<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| OutputError::ParquetError("writer already started".into()))?;

        let fields: Vec<Field> = layout
            .header()
            .into_iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields));
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))
            .map_err(parquet_err("Failed to start writer"))?;

        self.open = Some(Open {
            layout,
            schema,
            writer,
        });
        Ok(())
    }

    fn flush_rows(&mut self) -> OutputResult<()> {
        let Some(open) = self.open.as_mut() else {
            return Ok(());
        };
        if self.rows.is_empty() {
            return Ok(());
        }

        let width = open.schema.fields().len();
        let columns: Vec<ArrayRef> = (0..width)
            .map(|i| {
                let column: StringArray = self
                    .rows
                    .iter()
                    .map(|row| row.get(i).and_then(|cell| cell.as_deref()))
                    .collect();
                Arc::new(column) as ArrayRef
            })
            .collect();

        let batch = ArrowBatch::try_new(open.schema.clone(), columns)
            .map_err(parquet_err("Failed to build row group"))?;
        open.writer
            .write(&batch)
            .map_err(parquet_err("Failed to write rows"))?;
        open.writer
            .flush()
            .map_err(parquet_err("Failed to flush row group"))?;

        self.row_groups += 1;
        self.records_written += self.rows.len() as u64;
        debug!(
            rows = self.rows.len(),
            bytes = self.buffered_bytes,
            row_groups = self.row_groups,
            "Parquet row group written"
        );
        self.rows.clear();
        self.buffered_bytes = 0;
        Ok(())
    }
}

impl RecordSink for ParquetSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Parquet
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if self.open.is_none() {
            self.start(ColumnLayout::from_records(&batch.records))?;
        }
        let layout = match &self.open {
            Some(open) => open.layout.clone(),
            None => return Err(OutputError::ParquetError("writer not started".into())),
        };

        let mut warnings = Vec::new();
        for record in &batch.records {
            let (row, warning) = layout.project(record);
            self.buffered_bytes += row
                .iter()
                .map(|cell| cell.as_ref().map_or(0, String::len) + CELL_OVERHEAD_BYTES)
                .sum::<usize>();
            self.rows.push(row);
            warnings.extend(warning);
        }

        if self.buffered_bytes >= self.memory_ceiling {
            self.flush_rows()?;
        }
        Ok(warnings)
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn close(mut self: Box<Self>) -> OutputResult<SinkSummary> {
        if self.open.is_none() {
            self.start(ColumnLayout::empty())?;
        }
        self.flush_rows()?;

        let open = self
            .open
            .take()
            .ok_or_else(|| OutputError::ParquetError("writer not started".into()))?;
        let file = open
            .writer
            .into_inner()
            .map_err(parquet_err("Failed to write footer"))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))?;

        info!(
            "Parquet writer closed successfully: {} records in {} row groups",
            self.records_written, self.row_groups
        );
        Ok(SinkSummary {
            format: SinkFormat::Parquet,
            records_written: self.records_written,
            path: self.path.clone(),
        })
    }
}
