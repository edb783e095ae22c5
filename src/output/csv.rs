//! CSV output writer
//!
//! The header is fixed by the first non-empty batch. Fields that appear later,
//! or values that do not flatten to one cell, are preserved as JSON in the
//! `_overflow` column and reported as warnings.

use csv::Writer;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::flatten::ColumnLayout;
use super::{
    create_file, finish_file, OutputError, OutputResult, RecordSink, SinkFormat, SinkSummary,
    SinkWarning,
};
use crate::fetcher::RecordBatch;

/// Flattened CSV sink
pub struct CsvSink {
    writer: Writer<BufWriter<File>>,
    path: PathBuf,
    layout: Option<ColumnLayout>,
    records_written: u64,
}

impl CsvSink {
    /// Create the file; the header is written with the first records
    pub fn new(path: &Path) -> OutputResult<Self> {
        info!("Creating CSV writer: path={}", path.display());
        let writer = Writer::from_writer(create_file(path)?);

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            layout: None,
            records_written: 0,
        })
    }

    /// Column layout, once fixed
    pub fn layout(&self) -> Option<&ColumnLayout> {
        self.layout.as_ref()
    }

    fn write_header(&mut self, layout: &ColumnLayout) -> OutputResult<()> {
        self.writer
            .write_record(layout.header())
            .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))
    }
}

impl RecordSink for CsvSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Csv
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let layout = match &self.layout {
            Some(layout) => layout.clone(),
            None => {
                let layout = ColumnLayout::from_records(&batch.records);
                self.write_header(&layout)?;
                debug!(columns = layout.fields().len(), "CSV header fixed");
                self.layout = Some(layout.clone());
                layout
            }
        };

        let mut warnings = Vec::new();
        for record in &batch.records {
            let (row, warning) = layout.project(record);
            self.writer
                .write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))
                .map_err(|e| {
                    OutputError::CsvError(format!("Failed to write record {}: {}", record.id, e))
                })?;
            self.records_written += 1;
            warnings.extend(warning);
        }

        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))?;
        Ok(warnings)
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn close(mut self: Box<Self>) -> OutputResult<SinkSummary> {
        debug!("Closing CSV writer: {} total records written", self.records_written);

        if self.layout.is_none() {
            self.write_header(&ColumnLayout::empty())?;
        }

        let CsvSink {
            writer,
            path,
            records_written,
            ..
        } = *self;

        let buf_writer = writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get inner writer: {}", e)))?;
        finish_file(buf_writer)?;

        info!("CSV writer closed successfully: {} records written", records_written);
        Ok(SinkSummary {
            format: SinkFormat::Csv,
            records_written,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Record;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn batch(records: Value) -> RecordBatch {
        RecordBatch {
            base_id: "app1".into(),
            table_id: "tbl1".into(),
            page: 1,
            records: serde_json::from_value::<Vec<Record>>(records).unwrap(),
        }
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_csv_writer_empty_close_writes_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.csv");

        let summary = Box::new(CsvSink::new(&path).unwrap()).close().unwrap();
        assert_eq!(summary.records_written, 0);
        assert_eq!(read_rows(&path), vec![vec!["id", "createdTime", "_overflow"]]);
    }

    #[test]
    fn test_csv_writer_flattens_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.csv");

        let mut sink = Box::new(CsvSink::new(&path).unwrap());
        let warnings = sink
            .write_batch(&batch(json!([
                {"id": "rec1", "createdTime": "2024-01-01T00:00:00.000Z",
                 "fields": {"Name": "Alpha, Inc", "Tags": ["a", "b"], "Done": true}},
                {"id": "rec2", "fields": {"Name": "Beta"}}
            ])))
            .unwrap();
        assert!(warnings.is_empty());
        sink.close().unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows[0], vec!["id", "createdTime", "Name", "Tags", "Done", "_overflow"]);
        assert_eq!(
            rows[1],
            vec!["rec1", "2024-01-01T00:00:00.000Z", "Alpha, Inc", "a; b", "true", ""]
        );
        assert_eq!(rows[2], vec!["rec2", "", "Beta", "", "", ""]);
    }

    #[test]
    fn test_csv_writer_late_fields_overflow() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.csv");

        let mut sink = Box::new(CsvSink::new(&path).unwrap());
        sink.write_batch(&batch(json!([]))).unwrap();
        sink.write_batch(&batch(json!([{"id": "rec1", "fields": {"Name": "a"}}])))
            .unwrap();
        let warnings = sink
            .write_batch(&batch(json!([
                {"id": "rec2", "fields": {"Name": "b", "Owner": {"name": "x"}}}
            ])))
            .unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].record_id, "rec2");
        assert_eq!(sink.close().unwrap().records_written, 2);

        let rows = read_rows(&path);
        assert_eq!(rows[0], vec!["id", "createdTime", "Name", "_overflow"]);
        let overflow: Value = serde_json::from_str(&rows[2][3]).unwrap();
        assert_eq!(overflow, json!({"Owner": {"name": "x"}}));
    }
}
