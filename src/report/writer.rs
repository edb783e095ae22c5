//! Atomic persistence of metadata and report files

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{generate, BackupMetadata, NameMapping, ReportError};
use crate::session::{BackupSession, SessionLayout};

/// Paths written by [`write_outputs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    /// `metadata/backup_metadata.json`
    pub metadata_json: PathBuf,
    /// `metadata/backup_metadata.yaml`
    pub metadata_yaml: PathBuf,
    /// `metadata/name_mapping.json`
    pub name_mapping: PathBuf,
    /// `reports/backup_report.txt`
    pub report: PathBuf,
}

/// Everything [`write_outputs`] produced
#[derive(Debug, Clone)]
pub struct WrittenReport {
    /// Session summary
    pub metadata: BackupMetadata,
    /// Human-readable report text
    pub report: String,
    /// Where it was written
    pub files: ReportFiles,
}

/// Generate and persist the metadata, name mapping and report of a session.
///
/// Each file is written to a temp file in its target directory and then
/// renamed into place, so a reader never sees a truncated file.
///
/// # Errors
/// Returns [`ReportError`] if encoding or any write fails
pub fn write_outputs(
    layout: &SessionLayout,
    session: &BackupSession,
) -> Result<WrittenReport, ReportError> {
    let (metadata, report) = generate(session);
    let mapping = NameMapping::from_session(session);

    let metadata_dir = layout.metadata_dir();
    let files = ReportFiles {
        metadata_json: metadata_dir.join("backup_metadata.json"),
        metadata_yaml: metadata_dir.join("backup_metadata.yaml"),
        name_mapping: metadata_dir.join("name_mapping.json"),
        report: layout.reports_dir().join("backup_report.txt"),
    };

    let json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| ReportError::Serialization(e.to_string()))?;
    write_atomic(&files.metadata_json, json.as_bytes())?;

    let yaml =
        serde_yaml::to_string(&metadata).map_err(|e| ReportError::Serialization(e.to_string()))?;
    write_atomic(&files.metadata_yaml, yaml.as_bytes())?;

    let mapping = serde_json::to_string_pretty(&mapping)
        .map_err(|e| ReportError::Serialization(e.to_string()))?;
    write_atomic(&files.name_mapping, mapping.as_bytes())?;

    write_atomic(&files.report, report.as_bytes())?;

    info!(
        metadata = %files.metadata_json.display(),
        report = %files.report.display(),
        "Backup report generated"
    );
    Ok(WrittenReport {
        metadata,
        report,
        files,
    })
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ReportError> {
    let parent = path
        .parent()
        .ok_or_else(|| ReportError::Io(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)
        .map_err(|e| ReportError::Io(format!("Failed to create directory: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ReportError::Io(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(contents)
        .map_err(|e| ReportError::Io(format!("Failed to write temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ReportError::Io(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| ReportError::Io(format!("Failed to persist temp file: {e}")))?;

    debug!(path = %path.display(), bytes = contents.len(), "Wrote report file");
    Ok(())
}
