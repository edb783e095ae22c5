//! Attachment downloads
//!
//! Attachments of each batch are downloaded concurrently (bounded) before the
//! next page is requested. Files land under
//! `attachments/{base_id}/{table_slug}/{record_id}_{field}_{filename}` and are
//! written through a temporary file, so an interrupted download never leaves a
//! partial file behind.

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::client::{ApiRequest, ClientError, RateLimitedClient};
use crate::fetcher::RecordBatch;
use crate::metrics;
use crate::output::path::{sanitize_attachment_name, sanitize_filename};
use crate::session::{ErrorCollector, ErrorScope};

/// Default number of concurrent downloads
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Request failed after retries, or was rejected
    #[error(transparent)]
    Client(#[from] ClientError),

    /// File could not be written
    #[error("IO error: {0}")]
    Io(String),

    /// Attachment URL could not be parsed
    #[error("invalid attachment URL: {0}")]
    InvalidUrl(String),
}

impl DownloadError {
    /// Whether the failure was transient at its source
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Client(e) => {
                e.is_transient() || matches!(e, ClientError::RetriesExhausted { .. })
            }
            _ => false,
        }
    }
}

/// One attachment to fetch, with the context needed to place and report it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Owning base
    pub base_id: String,
    /// Table display name
    pub table_name: String,
    /// Table slug
    pub table_slug: String,
    /// Owning record
    pub record_id: String,
    /// Field holding the attachment
    pub field_name: String,
    /// Attachment identifier, when reported
    pub attachment_id: Option<String>,
    /// Download URL
    pub url: String,
    /// Original filename, when reported
    pub filename: Option<String>,
    /// Reported size in bytes
    pub size: Option<u64>,
}

impl AttachmentRef {
    /// All attachments referenced by a batch, in record order
    pub fn from_batch(batch: &RecordBatch, table_name: &str, table_slug: &str) -> Vec<Self> {
        batch
            .records
            .iter()
            .flat_map(|record| {
                record
                    .attachments()
                    .into_iter()
                    .map(move |(field, attachment)| AttachmentRef {
                        base_id: batch.base_id.clone(),
                        table_name: table_name.to_string(),
                        table_slug: table_slug.to_string(),
                        record_id: record.id.clone(),
                        field_name: field.to_string(),
                        attachment_id: attachment
                            .raw()
                            .get("id")
                            .and_then(|id| id.as_str())
                            .map(str::to_string),
                        url: attachment.url.clone(),
                        filename: attachment.filename.clone(),
                        size: attachment.size,
                    })
            })
            .collect()
    }

    fn identity(&self) -> String {
        match &self.attachment_id {
            Some(id) => format!("{}/{}/{}", self.record_id, self.field_name, id),
            None => format!("{}/{}/{}", self.record_id, self.field_name, self.url),
        }
    }

    /// Reported filename, else the last URL path segment
    fn display_filename(&self) -> String {
        self.filename.clone().unwrap_or_else(|| {
            Url::parse(&self.url)
                .ok()
                .and_then(|url| {
                    url.path_segments()
                        .and_then(|mut segments| segments.next_back().map(str::to_string))
                })
                .filter(|segment| !segment.is_empty())
                .unwrap_or_default()
        })
    }

    /// Preferred file name before deduplication
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}",
            sanitize_attachment_name(&self.record_id),
            sanitize_attachment_name(&self.field_name),
            sanitize_attachment_name(&self.display_filename())
        )
    }

    fn scope(&self) -> ErrorScope {
        ErrorScope::Attachment {
            base_id: self.base_id.clone(),
            table: self.table_name.clone(),
            record_id: self.record_id.clone(),
            url: self.url.clone(),
        }
    }
}

/// A file on disk after a download attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    /// Final path
    pub path: PathBuf,
    /// File size
    pub bytes: u64,
    /// Hex sha256 of the content; `None` when the existing file was kept
    pub sha256: Option<String>,
    /// Whether an existing file was kept instead of downloading
    pub skipped: bool,
}

/// Counts for one batch of downloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Files written this run
    pub downloaded: u64,
    /// Existing files kept
    pub skipped: u64,
    /// Failed downloads
    pub failed: u64,
    /// Every file that is on disk after the batch
    pub files: Vec<AttachmentFile>,
}

/// File name assignment within one table's attachment directory.
///
/// Names are compared case-insensitively; a different attachment claiming an
/// assigned name gets `_1`, `_2`, ... before the extension.
#[derive(Debug)]
pub struct TableAttachmentScope {
    dir: PathBuf,
    assigned: HashMap<String, String>,
}

impl TableAttachmentScope {
    /// Directory of this table's attachments
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Target path for an attachment; stable for repeated refs
    pub fn assign(&mut self, reference: &AttachmentRef) -> PathBuf {
        let identity = reference.identity();
        let preferred = reference.file_name();
        let (stem, ext) = match preferred.rfind('.') {
            Some(dot) if dot > 0 => (&preferred[..dot], &preferred[dot..]),
            _ => (preferred.as_str(), ""),
        };

        let mut candidate = preferred.clone();
        let mut counter = 1u32;
        loop {
            match self.assigned.get(&candidate.to_lowercase()) {
                Some(owner) if *owner == identity => break,
                Some(_) => {
                    candidate = format!("{stem}_{counter}{ext}");
                    counter += 1;
                }
                None => {
                    self.assigned.insert(candidate.to_lowercase(), identity);
                    break;
                }
            }
        }
        self.dir.join(candidate)
    }
}

/// Downloads attachments with bounded concurrency
#[derive(Debug, Clone)]
pub struct AttachmentDownloader {
    client: RateLimitedClient,
    root: PathBuf,
    redownload_existing: bool,
    concurrency: usize,
}

impl AttachmentDownloader {
    /// Create a downloader
    ///
    /// # Arguments
    /// * `client` - Unauthenticated client; attachment URLs are pre-signed
    /// * `root` - The session's `attachments/` directory
    pub fn new(client: RateLimitedClient, root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            root: root.into(),
            redownload_existing: false,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Overwrite files that already exist
    pub fn with_redownload(mut self, redownload_existing: bool) -> Self {
        self.redownload_existing = redownload_existing;
        self
    }

    /// Set the concurrency bound (at least 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Concurrency bound in effect
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Name scope for one table; the base id is sanitized like the slug
    pub fn table_scope(&self, base_id: &str, table_slug: &str) -> TableAttachmentScope {
        TableAttachmentScope {
            dir: self.root.join(sanitize_filename(base_id)).join(table_slug),
            assigned: HashMap::new(),
        }
    }

    /// Download one attachment to `target`.
    ///
    /// An existing file is kept unless re-downloading is enabled.
    ///
    /// # Errors
    /// Returns [`DownloadError`] if the URL is invalid, the request fails, or
    /// the file cannot be persisted
    pub async fn download(
        &self,
        reference: &AttachmentRef,
        target: &Path,
    ) -> Result<AttachmentFile, DownloadError> {
        if !self.redownload_existing {
            if let Ok(metadata) = tokio::fs::metadata(target).await {
                if metadata.is_file() {
                    debug!(path = %target.display(), "Attachment exists, skipping");
                    return Ok(AttachmentFile {
                        path: target.to_path_buf(),
                        bytes: metadata.len(),
                        sha256: None,
                        skipped: true,
                    });
                }
            }
        }

        let url = Url::parse(&reference.url)
            .map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", reference.url, e)))?;
        let response = self.client.send(&ApiRequest::get(url)).await?;

        let body = response.body;
        let sha256 = format!("{:x}", Sha256::digest(&body));
        let bytes = body.len() as u64;
        persist(target.to_path_buf(), body).await?;

        debug!(path = %target.display(), bytes, "Attachment written");
        Ok(AttachmentFile {
            path: target.to_path_buf(),
            bytes,
            sha256: Some(sha256),
            skipped: false,
        })
    }

    /// Download every attachment of a batch.
    ///
    /// Paths are assigned in reference order before any request is made, so
    /// naming does not depend on completion order. Failures are recorded as
    /// attachment-scope errors and never abort the batch.
    pub async fn download_batch(
        &self,
        scope: &mut TableAttachmentScope,
        refs: Vec<AttachmentRef>,
        errors: &ErrorCollector,
    ) -> DownloadSummary {
        let jobs: Vec<(AttachmentRef, PathBuf)> = refs
            .into_iter()
            .map(|reference| {
                let path = scope.assign(&reference);
                (reference, path)
            })
            .collect();

        let results: Vec<(AttachmentRef, Result<AttachmentFile, DownloadError>)> =
            stream::iter(jobs)
                .map(|(reference, path)| async move {
                    let result = self.download(&reference, &path).await;
                    (reference, result)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut summary = DownloadSummary::default();
        for (reference, result) in results {
            match result {
                Ok(file) if file.skipped => {
                    summary.skipped += 1;
                    summary.files.push(file);
                }
                Ok(file) => {
                    metrics::record_attachment(true);
                    summary.downloaded += 1;
                    summary.files.push(file);
                }
                Err(e) => {
                    metrics::record_attachment(false);
                    summary.failed += 1;
                    errors.record(reference.scope(), "download attachment", &e);
                }
            }
        }

        if summary.downloaded + summary.skipped + summary.failed > 0 {
            info!(
                downloaded = summary.downloaded,
                skipped = summary.skipped,
                failed = summary.failed,
                "Attachment batch finished"
            );
        }
        summary
    }
}

/// Write through a temp file in the target directory, then rename into place
async fn persist(target: PathBuf, body: Bytes) -> Result<(), DownloadError> {
    tokio::task::spawn_blocking(move || -> Result<(), DownloadError> {
        let dir = target
            .parent()
            .ok_or_else(|| DownloadError::Io(format!("{} has no parent", target.display())))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| DownloadError::Io(format!("Failed to create directory: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| DownloadError::Io(format!("Failed to create temp file: {}", e)))?;
        tmp.write_all(&body)
            .map_err(|e| DownloadError::Io(format!("Failed to write attachment: {}", e)))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| DownloadError::Io(format!("Failed to sync attachment: {}", e)))?;
        tmp.persist(&target)
            .map_err(|e| DownloadError::Io(format!("Failed to persist attachment: {}", e)))?;
        Ok(())
    })
    .await
    .map_err(|e| DownloadError::Io(format!("Write task failed: {}", e)))?
}
