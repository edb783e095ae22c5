//! Full backup of a scripted two-base workspace

use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use airtable_backup::attachments::AttachmentDownloader;
use airtable_backup::orchestrator::{BackupOrchestrator, TableStatus};
use airtable_backup::output::SinkFormat;
use airtable_backup::report;
use airtable_backup::session::{RunStatus, SessionLayout};
use airtable_backup::shutdown::ShutdownCoordinator;

use super::support::{client, record, source, RecordingSleeper, ScriptedTransport};

const ATTACHMENT_BODY: &str = "%PDF-1.4 contract";

fn script_workspace(transport: &ScriptedTransport) {
    transport.respond_json(
        "/v0/meta/bases",
        json!({"bases": [
            {"id": "app1", "name": "CRM", "permissionLevel": "create"},
            {"id": "app2", "name": "Ops", "permissionLevel": "read"}
        ]}),
    );
    transport.respond_json(
        "/v0/meta/bases/app1/tables",
        json!({"tables": [{"id": "tbl1", "name": "Deals"}]}),
    );
    transport.respond_json(
        "/v0/meta/bases/app2/tables",
        json!({"tables": [{"id": "tbl2", "name": "Tasks"}]}),
    );
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [
            record("rec1", json!({
                "Name": "Acme",
                "Amount": 1200,
                "Contract": [{
                    "id": "att1",
                    "url": "https://dl.test/files/contract.pdf",
                    "filename": "contract.pdf",
                    "size": 17
                }]
            })),
            record("rec2", json!({"Name": "Globex", "Amount": 300})),
            record("rec3", json!({"Name": "Initech", "Amount": null})),
        ]}),
    );
    transport.respond_json(
        "/v0/app2/tbl2",
        json!({"records": [
            record("recA", json!({"Title": "Ship", "Done": true})),
            record("recB", json!({"Title": "Test", "Done": false})),
            record("recC", json!({"Title": "Plan", "Tags": ["a", "b"]})),
        ]}),
    );
    transport.respond(
        "/files/contract.pdf",
        airtable_backup::client::ApiResponse::ok(ATTACHMENT_BODY),
    );
}

fn json_records(path: &Path) -> Vec<Value> {
    let text = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_two_bases_complete_backup() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    script_workspace(&transport);

    let layout = SessionLayout::new(dir.path().join("backup"), &Utc::now());
    let downloader =
        AttachmentDownloader::new(client(transport.clone(), sleeper.clone()), layout.attachments_dir());
    let orchestrator = BackupOrchestrator::new(
        Arc::new(source(transport.clone(), sleeper.clone())),
        layout.clone(),
        ShutdownCoordinator::shared(),
    )
    .with_formats(SinkFormat::available())
    .with_downloader(Some(downloader));

    let session = orchestrator.run().await.unwrap();

    assert_eq!(session.status(), RunStatus::Completed);
    assert!(session.errors().is_empty(), "{:?}", session.errors().snapshot());
    assert_eq!(session.total_records(), 6);
    assert_eq!(session.total_attachments(), 1);
    for table in session.tables() {
        assert_eq!(table.status, TableStatus::Completed);
        assert_eq!(table.records_fetched, 3);
        for format in SinkFormat::available() {
            assert_eq!(table.records_written.get(&format), Some(&3), "{format}");
        }
    }

    let data = layout.data_dir();
    let deals = json_records(&data.join("json/app1_Deals.json"));
    assert_eq!(deals.len(), 3);
    assert_eq!(deals[0]["fields"]["Name"], "Acme");
    assert_eq!(deals[0]["fields"]["Contract"][0]["id"], "att1");

    let ndjson = std::fs::read_to_string(data.join("ndjson/app2_Tasks.ndjson")).unwrap();
    assert_eq!(ndjson.lines().count(), 3);

    let yaml = std::fs::read_to_string(data.join("yaml/app2_Tasks.yaml")).unwrap();
    let yaml: Vec<serde_yaml::Value> = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(yaml.len(), 3);

    let mut csv = csv::Reader::from_path(data.join("csv/app1_Deals.csv")).unwrap();
    assert_eq!(csv.records().count(), 3);

    let db = rusqlite::Connection::open(data.join("sqlite/app1.db")).unwrap();
    let count: i64 = db
        .query_row("SELECT COUNT(*) FROM \"Deals\"", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 3);

    #[cfg(feature = "parquet")]
    {
        use parquet::file::reader::{FileReader, SerializedFileReader};
        let file = std::fs::File::open(data.join("parquet/app2_Tasks.parquet")).unwrap();
        let reader = SerializedFileReader::new(file).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 3);
    }

    let attachment = layout
        .attachments_dir()
        .join("app1/Deals/rec1_Contract_contract.pdf");
    assert_eq!(std::fs::read_to_string(attachment).unwrap(), ATTACHMENT_BODY);

    // API calls carry the token; pre-signed attachment URLs do not
    let requests = transport.requests();
    let bearers = transport.bearers();
    for (request, bearer) in requests.iter().zip(bearers.iter()) {
        if request.url.host_str() == Some("dl.test") {
            assert!(bearer.is_none());
        } else {
            assert_eq!(bearer.as_deref(), Some("pat-test"));
        }
    }
    assert!(sleeper.delays().is_empty());

    let written = report::write_outputs(&layout, &session).unwrap();
    assert!(written
        .report
        .contains("Summary: 2 bases / 2 tables / 6 records / 1 attachment\n"));
    assert!(written.report.contains("Complete (2):"));
    assert!(written.files.name_mapping.exists());
    assert_eq!(written.metadata.statistics.errors, 0);
}

#[tokio::test]
async fn test_second_run_skips_existing_attachments() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    script_workspace(&transport);
    let layout = SessionLayout::new(dir.path().join("backup"), &Utc::now());

    for expected_downloads in [1, 0] {
        let downloader = AttachmentDownloader::new(
            client(transport.clone(), sleeper.clone()),
            layout.attachments_dir(),
        );
        let session = BackupOrchestrator::new(
            Arc::new(source(transport.clone(), sleeper.clone())),
            layout.clone(),
            ShutdownCoordinator::shared(),
        )
        .with_formats(vec![SinkFormat::Ndjson])
        .with_downloader(Some(downloader))
        .run()
        .await
        .unwrap();

        assert_eq!(session.total_attachments(), expected_downloads);
    }

    assert_eq!(transport.requests_to("/files/contract.pdf").len(), 1);
}

#[tokio::test]
async fn test_tables_with_alike_names_keep_separate_sqlite_tables() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.respond_json(
        "/v0/meta/bases",
        json!({"bases": [{"id": "app1", "name": "CRM"}]}),
    );
    transport.respond_json(
        "/v0/meta/bases/app1/tables",
        json!({"tables": [
            {"id": "tbl1", "name": "Deals 2024"},
            {"id": "tbl2", "name": "Deals-2024"},
            {"id": "tbl3", "name": "deals 2024"}
        ]}),
    );
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [record("recA", json!({"Name": "a"})), record("recB", json!({"Name": "b"}))]}),
    );
    transport.respond_json(
        "/v0/app1/tbl2",
        json!({"records": [record("recC", json!({"Name": "c"}))]}),
    );
    transport.respond_json(
        "/v0/app1/tbl3",
        json!({"records": [record("recD", json!({"Name": "d"}))]}),
    );

    let layout = SessionLayout::new(dir.path().join("backup"), &Utc::now());
    let session = BackupOrchestrator::new(
        Arc::new(source(transport, sleeper)),
        layout.clone(),
        ShutdownCoordinator::shared(),
    )
    .with_formats(vec![SinkFormat::Sqlite])
    .run()
    .await
    .unwrap();

    assert_eq!(session.status(), RunStatus::Completed);
    let db = rusqlite::Connection::open(layout.data_dir().join("sqlite/app1.db")).unwrap();
    let tables: i64 = db
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 3);

    // Every table's rows survive in its own SQLite table
    for table in session.tables() {
        let rows: i64 = db
            .query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"", table.slug),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(Some(&(rows as u64)), table.records_written.get(&SinkFormat::Sqlite));
        assert_eq!(rows as u64, table.records_fetched);
    }
}
