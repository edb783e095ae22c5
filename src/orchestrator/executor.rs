//! Backup executor: bases → tables → batches

use chrono::Utc;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::job::{TableProgress, TableStatus};
use super::progress::BackupProgress;
use super::OrchestratorError;
use crate::attachments::{AttachmentDownloader, AttachmentRef, TableAttachmentScope};
use crate::client::config::REQUEST_TIMEOUT;
use crate::client::{RateLimitedClient, Sleeper, Transport};
use crate::client::{ReqwestTransport, TokioSleeper};
use crate::config::BackupConfig;
use crate::fetcher::{AirtableSource, RecordBatch, WorkspaceSource};
use crate::metrics;
use crate::output::{FormatWriterSet, SinkFormat, SinkOptions, SlugRegistry, TableTarget};
use crate::session::{
    BackupSession, ErrorCollector, ErrorScope, RunStatus, SessionError, SessionLayout,
};
use crate::shutdown::SharedShutdown;
use crate::Base;

const INTERRUPTED_REASON: &str = "interrupted before the table finished";

/// Authenticated Airtable source for a configuration
///
/// # Errors
/// Returns [`OrchestratorError`] if the token is missing, the HTTP stack
/// cannot be built, or an endpoint root is malformed
pub fn build_source(config: &BackupConfig) -> Result<AirtableSource, OrchestratorError> {
    let token = config.require_token()?;
    let client = RateLimitedClient::new(
        Arc::new(ReqwestTransport::new(REQUEST_TIMEOUT)?),
        Arc::new(TokioSleeper),
        config.min_request_interval,
        config.retry_policy(),
    )
    .with_token(token);

    Ok(
        AirtableSource::new(client, &config.api_base_url, &config.meta_base_url)?
            .with_page_size(config.page_size),
    )
}

/// Drives one backup run
pub struct BackupOrchestrator {
    source: Arc<dyn WorkspaceSource>,
    downloader: Option<AttachmentDownloader>,
    formats: Vec<SinkFormat>,
    sink_options: SinkOptions,
    layout: SessionLayout,
    shutdown: SharedShutdown,
    errors: ErrorCollector,
    progress: BackupProgress,
}

impl BackupOrchestrator {
    /// Orchestrator over an arbitrary source, writing every available format
    /// and downloading no attachments
    pub fn new(
        source: Arc<dyn WorkspaceSource>,
        layout: SessionLayout,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            source,
            downloader: None,
            formats: SinkFormat::available(),
            sink_options: SinkOptions::default(),
            layout,
            shutdown,
            errors: ErrorCollector::new(),
            progress: BackupProgress::hidden(),
        }
    }

    /// Production orchestrator for a validated configuration
    ///
    /// # Errors
    /// Returns [`OrchestratorError`] for an invalid configuration or a client
    /// that cannot be built
    pub fn from_config(
        config: &BackupConfig,
        layout: SessionLayout,
        shutdown: SharedShutdown,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let source = build_source(config)?;

        let downloader = if config.download_attachments {
            // Attachment URLs are pre-signed: no token, no request spacing.
            let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(REQUEST_TIMEOUT)?);
            let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
            let client =
                RateLimitedClient::new(transport, sleeper, Duration::ZERO, config.retry_policy());
            Some(
                AttachmentDownloader::new(client, layout.attachments_dir())
                    .with_redownload(config.redownload_existing)
                    .with_concurrency(config.attachment_concurrency),
            )
        } else {
            None
        };

        Ok(Self::new(Arc::new(source), layout, shutdown)
            .with_formats(config.formats.clone())
            .with_sink_options(config.sink_options())
            .with_downloader(downloader)
            .with_progress(BackupProgress::default()))
    }

    /// Enabled sinks
    pub fn with_formats(mut self, formats: Vec<SinkFormat>) -> Self {
        self.formats = formats;
        self
    }

    /// Sink tuning
    pub fn with_sink_options(mut self, options: SinkOptions) -> Self {
        self.sink_options = options;
        self
    }

    /// Attachment downloader, `None` to skip attachments
    pub fn with_downloader(mut self, downloader: Option<AttachmentDownloader>) -> Self {
        self.downloader = downloader;
        self
    }

    /// Shared error log
    pub fn with_errors(mut self, errors: ErrorCollector) -> Self {
        self.errors = errors;
        self
    }

    /// Terminal progress display
    pub fn with_progress(mut self, progress: BackupProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Output layout
    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    /// Run the backup to a terminal state.
    ///
    /// Base, table, record and attachment failures are collected in the
    /// session and never abort the run.
    ///
    /// # Errors
    /// Returns [`SessionError`] only when the output tree cannot be created
    pub async fn run(&self) -> Result<BackupSession, SessionError> {
        let started_at = Utc::now();
        self.layout.create(&self.formats)?;

        let mut session = BackupSession::new(
            self.layout.clone(),
            self.formats.clone(),
            self.errors.clone(),
        )
        .with_started_at(started_at);

        info!(
            output = %self.layout.root().display(),
            formats = ?self.formats,
            attachments = self.downloader.is_some(),
            "Starting backup"
        );

        let bases = match self.source.list_bases().await {
            Ok(bases) => bases,
            Err(e) => {
                self.errors
                    .record(ErrorScope::Workspace, "list bases", &e);
                session.finalize(RunStatus::Failed);
                return Ok(session);
            }
        };
        info!(bases = bases.len(), "Bases to back up");

        let mut base_slugs = SlugRegistry::new();
        let mut interrupted = false;

        for base in bases {
            let slug = base_slugs.slug_for(&base.name);
            let index = session.add_base(base.clone(), slug);
            if interrupted || self.shutdown.is_shutdown_requested() {
                interrupted = true;
                continue;
            }

            if self.run_base(&mut session, index, &base).await {
                interrupted = true;
            }
        }

        let status = if interrupted {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        session.finalize(status);
        Ok(session)
    }

    /// Back up one base. Returns `true` when an interrupt was observed.
    async fn run_base(&self, session: &mut BackupSession, index: usize, base: &Base) -> bool {
        let tables = self.source.list_tables(base).await;
        let Some(entry) = session.base_mut(index) else {
            return false;
        };
        entry.visited = true;

        let tables = match tables {
            Ok(tables) => tables,
            Err(e) => {
                self.errors.record(
                    ErrorScope::Base {
                        base_id: base.id.clone(),
                    },
                    "list tables",
                    &e,
                );
                entry.error = Some(e.to_string());
                return false;
            }
        };

        info!(base_id = %base.id, base = %base.name, tables = tables.len(), "Backing up base");
        let mut table_slugs = SlugRegistry::new();
        entry.tables = tables
            .into_iter()
            .map(|table| {
                let slug = table_slugs.slug_for(&table.name);
                TableProgress::new(base.id.clone(), table, slug)
            })
            .collect();

        for position in 0..entry.tables.len() {
            if self.shutdown.is_shutdown_requested() {
                info!(base_id = %base.id, "Interrupt observed, leaving remaining tables pending");
                return true;
            }
            let table = &mut entry.tables[position];
            self.run_table(base, table).await;
            if table.status == TableStatus::Interrupted {
                return true;
            }
        }
        false
    }

    async fn run_table(&self, base: &Base, progress: &mut TableProgress) {
        if let Err(e) = progress.transition(TableStatus::Fetching) {
            warn!(error = %e, table = %progress.table.name, "Skipping table");
            return;
        }

        let table = progress.table.clone();
        let scope = ErrorScope::table(&base.id, &table.name);
        info!(base_id = %base.id, table = %table.name, slug = %progress.slug, "Fetching table");

        let target = TableTarget::new(
            self.layout.data_dir(),
            base.clone(),
            table.clone(),
            progress.slug.clone(),
        );
        let (mut writers, open_failures) =
            FormatWriterSet::open(&self.formats, &target, &self.sink_options);
        for failure in open_failures {
            self.errors.record(
                scope.clone(),
                format!("open {} sink", failure.format),
                &failure.error,
            );
        }

        let mut attachment_scope = self
            .downloader
            .as_ref()
            .map(|downloader| downloader.table_scope(&base.id, &progress.slug));
        let spinner = self.progress.table(&base.name, &table.name);

        let outcome = match self.source.fetch_records(base, &table).await {
            Err(e) => {
                self.errors.record(scope.clone(), "fetch records", &e);
                (TableStatus::Failed, Some(e.to_string()))
            }
            Ok(mut batches) => loop {
                let next = tokio::select! {
                    biased;
                    _ = self.shutdown.wait_for_shutdown() => None,
                    item = batches.next() => Some(item),
                };

                match next {
                    None => break (TableStatus::Interrupted, Some(INTERRUPTED_REASON.to_string())),
                    Some(None) => break (TableStatus::Completed, None),
                    Some(Some(Err(e))) => {
                        self.errors.record(scope.clone(), "fetch records", &e);
                        break (TableStatus::Failed, Some(e.to_string()));
                    }
                    Some(Some(Ok(batch))) => {
                        self.process_batch(
                            &batch,
                            progress,
                            &mut writers,
                            attachment_scope.as_mut(),
                        )
                        .await;
                        spinner.update(
                            progress.pages,
                            progress.records_fetched,
                            progress.attachments_downloaded,
                        );
                    }
                }
            },
        };

        let (summaries, close_failures) = writers.close();
        for summary in summaries {
            progress
                .records_written
                .insert(summary.format, summary.records_written);
        }
        for failure in close_failures {
            self.errors.record(
                scope.clone(),
                format!("close {} sink", failure.format),
                &failure.error,
            );
        }
        if !progress.sinks_consistent() {
            warn!(
                table = %table.name,
                fetched = progress.records_fetched,
                written = ?progress.records_written,
                "Sink record counts differ from fetched count"
            );
        }

        let (status, reason) = outcome;
        progress.reason = reason;
        if let Err(e) = progress.transition(status) {
            error!(error = %e, table = %table.name, "Unexpected table state");
        }
        if status != TableStatus::Interrupted {
            metrics::record_table_outcome(status == TableStatus::Completed);
        }
        spinner.finish(status, progress.records_fetched);

        info!(
            base_id = %base.id,
            table = %table.name,
            status = %status,
            records = progress.records_fetched,
            pages = progress.pages,
            attachments = progress.attachments_downloaded,
            "Table finished"
        );
    }

    async fn process_batch(
        &self,
        batch: &RecordBatch,
        progress: &mut TableProgress,
        writers: &mut FormatWriterSet,
        attachment_scope: Option<&mut TableAttachmentScope>,
    ) {
        let table_name = progress.table.name.clone();
        progress.pages += 1;
        progress.records_fetched += batch.len() as u64;
        debug!(table = %table_name, page = batch.page, records = batch.len(), "Writing batch");

        let outcome = writers.write_batch(batch);
        for (format, warning) in outcome.warnings {
            self.errors.warn(
                ErrorScope::record(&batch.base_id, &table_name, &warning.record_id),
                format!("{format} write"),
                &warning.message,
            );
        }
        for failure in outcome.failures {
            self.errors.record(
                ErrorScope::table(&batch.base_id, &table_name),
                format!("{} write", failure.format),
                &failure.error,
            );
        }

        if let (Some(downloader), Some(scope)) = (&self.downloader, attachment_scope) {
            let refs = AttachmentRef::from_batch(batch, &table_name, &progress.slug);
            if !refs.is_empty() {
                let summary = downloader.download_batch(scope, refs, &self.errors).await;
                progress.attachments_downloaded += summary.downloaded;
                progress.attachments_skipped += summary.skipped;
                progress.attachments_failed += summary.failed;
            }
        }
    }
}
