//! Streaming JSON array writer
//!
//! `[` is written on open and `]` on close, with pretty-printed records
//! separated by commas in between, so the file parses after every clean close
//! regardless of how many batches arrived.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{
    create_file, finish_file, OutputError, OutputResult, RecordSink, SinkFormat, SinkSummary,
    SinkWarning,
};
use crate::fetcher::RecordBatch;

/// JSON array sink
pub struct JsonSink {
    writer: BufWriter<File>,
    path: PathBuf,
    records_written: u64,
}

impl JsonSink {
    /// Create the file and write the opening bracket
    pub fn new(path: &Path) -> OutputResult<Self> {
        info!("Creating JSON writer: path={}", path.display());
        let mut writer = create_file(path)?;
        writer
            .write_all(b"[")
            .map_err(|e| OutputError::IoError(format!("Failed to write: {}", e)))?;

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            records_written: 0,
        })
    }
}

impl RecordSink for JsonSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Json
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
        // Encode the whole batch first so a bad record cannot leave half an
        // object in the file.
        let mut chunk = Vec::new();
        for (i, record) in batch.records.iter().enumerate() {
            if self.records_written > 0 || i > 0 {
                chunk.extend_from_slice(b",");
            }
            chunk.extend_from_slice(b"\n");
            serde_json::to_writer_pretty(&mut chunk, record).map_err(|e| {
                OutputError::SerializationError(format!("record {}: {}", record.id, e))
            })?;
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

    fn close(mut self: Box<Self>) -> OutputResult<SinkSummary> {
        debug!("Closing JSON writer: {} total records written", self.records_written);
        let closing: &[u8] = if self.records_written > 0 { b"\n]\n" } else { b"]\n" };
        self.writer
            .write_all(closing)
            .map_err(|e| OutputError::IoError(format!("Failed to write: {}", e)))?;

        let JsonSink {
            writer,
            path,
            records_written,
        } = *self;
        finish_file(writer)?;

        Ok(SinkSummary {
            format: SinkFormat::Json,
            records_written,
            path,
        })
    }
}
