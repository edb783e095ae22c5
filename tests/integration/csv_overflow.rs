//! Values that do not fit a CSV cell go to `_overflow` without losing the record

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use airtable_backup::orchestrator::{BackupOrchestrator, TableStatus};
use airtable_backup::output::{SinkFormat, OVERFLOW_COLUMN};
use airtable_backup::session::{ErrorScope, RunStatus, SessionLayout, Severity};
use airtable_backup::shutdown::ShutdownCoordinator;

use super::support::{record, source, RecordingSleeper, ScriptedTransport};

#[tokio::test]
async fn test_nested_value_goes_to_overflow() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.respond_json(
        "/v0/meta/bases",
        json!({"bases": [{"id": "app1", "name": "CRM"}]}),
    );
    transport.respond_json(
        "/v0/meta/bases/app1/tables",
        json!({"tables": [{"id": "tbl1", "name": "Deals"}]}),
    );
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [
            record("rec1", json!({"Name": "Acme", "Owner": "ann"})),
            record("rec2", json!({"Name": "Globex", "Owner": {"id": "usr1", "email": "bo@example.com"}})),
            record("rec3", json!({"Name": "Initech", "Owner": "cy"})),
        ]}),
    );

    let layout = SessionLayout::new(dir.path().join("backup"), &Utc::now());
    let session = BackupOrchestrator::new(
        Arc::new(source(transport, sleeper)),
        layout.clone(),
        ShutdownCoordinator::shared(),
    )
    .with_formats(vec![SinkFormat::Json, SinkFormat::Csv, SinkFormat::Sqlite])
    .run()
    .await
    .unwrap();

    assert_eq!(session.status(), RunStatus::Completed);
    let table = session.tables().next().unwrap();
    assert_eq!(table.status, TableStatus::Completed);
    for format in [SinkFormat::Json, SinkFormat::Csv, SinkFormat::Sqlite] {
        assert_eq!(table.records_written.get(&format), Some(&3), "{format}");
    }

    let entries = session.errors().snapshot();
    assert_eq!(entries.len(), 1, "{entries:?}");
    assert_eq!(entries[0].severity, Severity::Warning);
    assert_eq!(entries[0].operation, "csv write");
    assert_eq!(
        entries[0].scope,
        ErrorScope::record("app1", "Deals", "rec2")
    );

    let mut reader =
        csv::Reader::from_path(layout.data_dir().join("csv/app1_Deals.csv")).unwrap();
    let header = reader.headers().unwrap().clone();
    let overflow_index = header.iter().position(|h| h == OVERFLOW_COLUMN).unwrap();
    let owner_index = header.iter().position(|h| h == "Owner").unwrap();
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 3);

    assert_eq!(&rows[0][owner_index], "ann");
    assert_eq!(&rows[0][overflow_index], "");
    assert_eq!(&rows[1][owner_index], "");
    let overflow: Value = serde_json::from_str(&rows[1][overflow_index]).unwrap();
    assert_eq!(overflow, json!({"Owner": {"id": "usr1", "email": "bo@example.com"}}));

    // The JSON sink keeps the value in place
    let text = std::fs::read_to_string(layout.data_dir().join("json/app1_Deals.json")).unwrap();
    let records: Vec<Value> = serde_json::from_str(&text).unwrap();
    assert_eq!(records[1]["fields"]["Owner"]["email"], "bo@example.com");
}

#[tokio::test]
async fn test_late_fields_go_to_overflow() {
    let dir = TempDir::new().unwrap();
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.respond_json(
        "/v0/meta/bases",
        json!({"bases": [{"id": "app1", "name": "CRM"}]}),
    );
    transport.respond_json(
        "/v0/meta/bases/app1/tables",
        json!({"tables": [{"id": "tbl1", "name": "Deals"}]}),
    );
    // The column set is fixed by the first page
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [record("rec1", json!({"Name": "Acme"}))], "offset": "itr1"}),
    );
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [record("rec2", json!({"Name": "Globex", "Stage": "won"}))]}),
    );

    let layout = SessionLayout::new(dir.path().join("backup"), &Utc::now());
    let session = BackupOrchestrator::new(
        Arc::new(source(transport, sleeper)),
        layout.clone(),
        ShutdownCoordinator::shared(),
    )
    .with_formats(vec![SinkFormat::Csv])
    .run()
    .await
    .unwrap();

    let table = session.tables().next().unwrap();
    assert_eq!(table.pages, 2);
    assert_eq!(table.records_written.get(&SinkFormat::Csv), Some(&2));

    let mut reader =
        csv::Reader::from_path(layout.data_dir().join("csv/app1_Deals.csv")).unwrap();
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["id", "createdTime", "Name", OVERFLOW_COLUMN]
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(&rows[1][3], r#"{"Stage":"won"}"#);
}
