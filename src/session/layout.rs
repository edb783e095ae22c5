//! Output directory layout for one backup session
//!
//! ```text
//! airtable_backup_2024-01-31_12-00-00/
//! ├── data/{json,yaml,ndjson,csv,sqlite,parquet}/
//! ├── attachments/{base_id}/{table_slug}/
//! ├── logs/backup_2024-01-31_12-00-00.log
//! ├── metadata/
//! └── reports/
//! ```

use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SessionError;
use crate::output::SinkFormat;

/// Timestamp format used for the default directory and the log file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Prefix of default output directories.
pub const DIR_PREFIX: &str = "airtable_backup_";

/// Paths of one session's output tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
    timestamp: String,
}

impl SessionLayout {
    /// Layout rooted at an explicit directory
    pub fn new<Tz: TimeZone>(root: impl Into<PathBuf>, started: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            root: root.into(),
            timestamp: started.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Layout at `{parent}/airtable_backup_{timestamp}`
    pub fn timestamped<Tz: TimeZone>(parent: &Path, started: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let timestamp = started.format(TIMESTAMP_FORMAT).to_string();
        Self {
            root: parent.join(format!("{DIR_PREFIX}{timestamp}")),
            timestamp,
        }
    }

    /// Create every directory the enabled formats need.
    ///
    /// # Errors
    /// Returns [`SessionError::CreateDir`]; this is the only run-aborting failure
    pub fn create(&self, formats: &[SinkFormat]) -> Result<(), SessionError> {
        let mut dirs = vec![
            self.data_dir(),
            self.attachments_dir(),
            self.logs_dir(),
            self.metadata_dir(),
            self.reports_dir(),
        ];
        dirs.extend(formats.iter().map(|format| self.format_dir(*format)));

        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| SessionError::CreateDir {
                path: dir.clone(),
                message: e.to_string(),
            })?;
        }

        debug!(root = %self.root.display(), "Session directories created");
        Ok(())
    }

    /// Session root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session timestamp (`YYYY-MM-DD_HH-MM-SS`)
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `data/`
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// `data/{format}/`
    pub fn format_dir(&self, format: SinkFormat) -> PathBuf {
        self.data_dir().join(format.dir_name())
    }

    /// `attachments/`
    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join("attachments")
    }

    /// `logs/`
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// `logs/backup_{timestamp}.log`
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join(format!("backup_{}.log", self.timestamp))
    }

    /// `metadata/`
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// `reports/`
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }
}
