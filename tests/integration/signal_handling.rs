//! Cooperative interruption at batch boundaries

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;

use airtable_backup::fetcher::{BatchStream, FetcherResult, RecordBatch, WorkspaceSource};
use airtable_backup::orchestrator::{BackupOrchestrator, TableStatus};
use airtable_backup::output::SinkFormat;
use airtable_backup::report;
use airtable_backup::session::{RunStatus, SessionLayout};
use airtable_backup::shutdown::{SharedShutdown, ShutdownCoordinator};
use airtable_backup::{Base, Fields, Record, Table};

/// When the in-memory source requests shutdown
#[derive(Clone, Copy)]
enum InterruptAt {
    /// After the first table's last batch
    AfterFirstTable,
    /// After the first batch of the second table, leaving its stream open
    InsideSecondTable,
}

struct InterruptingSource {
    shutdown: SharedShutdown,
    at: InterruptAt,
}

fn batch(table: &Table, page: u32, ids: &[&str]) -> FetcherResult<RecordBatch> {
    Ok(RecordBatch {
        base_id: "app1".into(),
        table_id: table.id.clone(),
        page,
        records: ids.iter().map(|id| Record::new(*id, Fields::new())).collect(),
    })
}

#[async_trait]
impl WorkspaceSource for InterruptingSource {
    async fn list_bases(&self) -> FetcherResult<Vec<Base>> {
        Ok(vec![Base::new("app1", "CRM"), Base::new("app2", "Ops")])
    }

    async fn list_tables(&self, base: &Base) -> FetcherResult<Vec<Table>> {
        Ok(match base.id.as_str() {
            "app1" => vec![
                Table::new("tbl1", "First"),
                Table::new("tbl2", "Second"),
                Table::new("tbl3", "Third"),
            ],
            _ => vec![Table::new("tbl9", "Elsewhere")],
        })
    }

    async fn fetch_records(&self, _base: &Base, table: &Table) -> FetcherResult<BatchStream> {
        let shutdown = self.shutdown.clone();
        let first = vec![batch(table, 1, &["rec1", "rec2"]), batch(table, 2, &["rec3"])];
        let requests = stream::once(async move {
            shutdown.request_shutdown();
        });

        let batches: BatchStream = match (self.at, table.id.as_str()) {
            (InterruptAt::AfterFirstTable, "tbl1") => Box::pin(
                stream::iter(first).chain(requests.filter_map(|_| async { None })),
            ),
            (InterruptAt::InsideSecondTable, "tbl2") => Box::pin(
                stream::iter(vec![batch(table, 1, &["recA"])])
                    .chain(requests.filter_map(|_| async { None }))
                    .chain(stream::pending()),
            ),
            _ => Box::pin(stream::iter(first)),
        };
        Ok(batches)
    }
}

fn orchestrator(dir: &TempDir, at: InterruptAt) -> (BackupOrchestrator, SessionLayout) {
    let shutdown = ShutdownCoordinator::shared();
    let layout = SessionLayout::new(dir.path().join("backup"), &Utc::now());
    let orchestrator = BackupOrchestrator::new(
        Arc::new(InterruptingSource {
            shutdown: shutdown.clone(),
            at,
        }),
        layout.clone(),
        shutdown,
    )
    .with_formats(vec![SinkFormat::Json, SinkFormat::Ndjson, SinkFormat::Csv]);
    (orchestrator, layout)
}

#[tokio::test]
async fn test_interrupt_between_tables() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, layout) = orchestrator(&dir, InterruptAt::AfterFirstTable);

    let session = orchestrator.run().await.unwrap();

    assert_eq!(session.status(), RunStatus::Interrupted);
    let statuses: Vec<TableStatus> = session.tables().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TableStatus::Completed, TableStatus::Pending, TableStatus::Pending]
    );

    // The finished table is complete and valid; the next one was never opened
    let json_dir = layout.format_dir(SinkFormat::Json);
    let first: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(json_dir.join("app1_First.json")).unwrap())
            .unwrap();
    assert_eq!(first.len(), 3);
    assert!(!json_dir.join("app1_Second.json").exists());

    // The second base is registered but not visited
    assert_eq!(session.bases().len(), 2);
    assert!(!session.bases()[1].visited);

    let (metadata, text) = report::generate(&session);
    assert_eq!(metadata.statistics.tables_pending, 2);
    assert!(text.contains("Complete (1):\n  - CRM / First: 3 records"));
    assert!(text.contains("  - CRM / Second: not started"));
    assert!(text.contains("  - Ops: base not visited"));
}

#[tokio::test]
async fn test_interrupt_inside_table_closes_sinks() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, layout) = orchestrator(&dir, InterruptAt::InsideSecondTable);

    let session = tokio::time::timeout(std::time::Duration::from_secs(5), orchestrator.run())
        .await
        .expect("interrupt must end the stalled table")
        .unwrap();

    assert_eq!(session.status(), RunStatus::Interrupted);
    let tables: Vec<_> = session.tables().collect();
    assert_eq!(tables[0].status, TableStatus::Completed);
    assert_eq!(tables[1].status, TableStatus::Interrupted);
    assert_eq!(tables[1].records_fetched, 1);
    assert_eq!(tables[1].records_written.get(&SinkFormat::Json), Some(&1));
    assert_eq!(tables[2].status, TableStatus::Pending);

    // The partial table's files are closed and parseable
    let second: Vec<Value> = serde_json::from_str(
        &std::fs::read_to_string(layout.format_dir(SinkFormat::Json).join("app1_Second.json"))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(second.len(), 1);
    let ndjson =
        std::fs::read_to_string(layout.format_dir(SinkFormat::Ndjson).join("app1_Second.ndjson"))
            .unwrap();
    assert_eq!(ndjson.lines().count(), 1);

    let (_, text) = report::generate(&session);
    assert!(text.contains("  - CRM / Second: 1 record before interruption"));
}
