//! Newline-delimited JSON writer

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{
    create_file, finish_file, OutputError, OutputResult, RecordSink, SinkFormat, SinkSummary,
    SinkWarning,
};
use crate::fetcher::RecordBatch;

/// One compact JSON object per line
pub struct NdjsonSink {
    writer: BufWriter<File>,
    path: PathBuf,
    records_written: u64,
}

impl NdjsonSink {
    /// Create the file
    pub fn new(path: &Path) -> OutputResult<Self> {
        info!("Creating NDJSON writer: path={}", path.display());
        Ok(Self {
            writer: create_file(path)?,
            path: path.to_path_buf(),
            records_written: 0,
        })
    }
}

impl RecordSink for NdjsonSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Ndjson
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
        let mut chunk = Vec::new();
        for record in &batch.records {
            serde_json::to_writer(&mut chunk, record).map_err(|e| {
                OutputError::SerializationError(format!("record {}: {}", record.id, e))
            })?;
            chunk.push(b'\n');
        }

        self.writer
            .write_all(&chunk)
            .map_err(|e| OutputError::IoError(format!("Failed to write batch: {}", e)))?;
        self.records_written += batch.records.len() as u64;
        Ok(Vec::new())
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn close(self: Box<Self>) -> OutputResult<SinkSummary> {
        let NdjsonSink {
            writer,
            path,
            records_written,
        } = *self;
        finish_file(writer)?;

        Ok(SinkSummary {
            format: SinkFormat::Ndjson,
            records_written,
            path,
        })
    }
}
