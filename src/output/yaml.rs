//! Streaming YAML writer
//!
//! Each record is appended as one item of a top-level block sequence. A table
//! without records is written as `[]`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{
    create_file, finish_file, OutputError, OutputResult, RecordSink, SinkFormat, SinkSummary,
    SinkWarning,
};
use crate::fetcher::RecordBatch;

/// YAML block-sequence sink
pub struct YamlSink {
    writer: BufWriter<File>,
    path: PathBuf,
    records_written: u64,
}

impl YamlSink {
    /// Create the file
    pub fn new(path: &Path) -> OutputResult<Self> {
        info!("Creating YAML writer: path={}", path.display());
        Ok(Self {
            writer: create_file(path)?,
            path: path.to_path_buf(),
            records_written: 0,
        })
    }
}

impl RecordSink for YamlSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Yaml
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
        let mut chunk = String::new();
        for record in &batch.records {
            let item = serde_yaml::to_string(std::slice::from_ref(record)).map_err(|e| {
                OutputError::SerializationError(format!("record {}: {}", record.id, e))
            })?;
            chunk.push_str(&item);
        }

        self.writer
            .write_all(chunk.as_bytes())
            .map_err(|e| OutputError::IoError(format!("Failed to write batch: {}", e)))?;
        self.records_written += batch.records.len() as u64;
        Ok(Vec::new())
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn close(mut self: Box<Self>) -> OutputResult<SinkSummary> {
        if self.records_written == 0 {
            self.writer
                .write_all(b"[]\n")
                .map_err(|e| OutputError::IoError(format!("Failed to write: {}", e)))?;
        }

        let YamlSink {
            writer,
            path,
            records_written,
        } = *self;
        finish_file(writer)?;

        Ok(SinkSummary {
            format: SinkFormat::Yaml,
            records_written,
            path,
        })
    }
}
