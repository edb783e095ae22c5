//! Transient failures are absorbed below the retry ceiling and surface once at it

use futures_util::StreamExt;
use serde_json::json;
use std::time::Duration;

use airtable_backup::client::{ApiRequest, ApiResponse, ClientError};
use airtable_backup::fetcher::{FetcherError, WorkspaceSource};
use airtable_backup::{Base, Table};

use super::support::{client, record, source, RecordingSleeper, ScriptedTransport};

#[tokio::test]
async fn test_two_server_errors_then_success() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let page = json!({"records": [record("rec1", json!({"Name": "Acme"}))]});
    transport.respond("/v0/app1/tbl1", ApiResponse::status(500));
    transport.respond("/v0/app1/tbl1", ApiResponse::status(500));
    transport.respond_json("/v0/app1/tbl1", page);

    let source = source(transport.clone(), sleeper.clone());
    let mut batches = source
        .fetch_records(&Base::new("app1", "CRM"), &Table::new("tbl1", "Deals"))
        .await
        .unwrap();

    let batch = batches.next().await.unwrap().unwrap();
    assert_eq!(batch.page, 1);
    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.records[0].id, "rec1");
    assert!(batches.next().await.is_none());

    // Exponential backoff without jitter: 1 s, then 2 s
    assert_eq!(
        sleeper.delays(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(transport.requests_to("/v0/app1/tbl1").len(), 3);
}

#[tokio::test]
async fn test_retry_ceiling_gives_one_fatal_error() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.respond("/v0/app1/tbl1", ApiResponse::status(503));

    let source = source(transport.clone(), sleeper.clone());
    let mut batches = source
        .fetch_records(&Base::new("app1", "CRM"), &Table::new("tbl1", "Deals"))
        .await
        .unwrap();

    let error = batches.next().await.unwrap().unwrap_err();
    assert!(matches!(
        error,
        FetcherError::Client(ClientError::RetriesExhausted { attempts: 4, .. })
    ));
    assert!(batches.next().await.is_none());

    // Default ceiling: 1 attempt plus 3 retries
    assert_eq!(transport.requests_to("/v0/app1/tbl1").len(), 4);
    assert_eq!(sleeper.delays().len(), 3);
}

#[tokio::test]
async fn test_retry_after_raises_delay() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    let mut limited = ApiResponse::status(429);
    limited.retry_after = Some(Duration::from_secs(30));
    transport.respond("/v0/meta/bases", limited);
    transport.respond_json("/v0/meta/bases", json!({"bases": []}));

    let client = client(transport.clone(), sleeper.clone());
    let url = reqwest::Url::parse("https://api.test/v0/meta/bases").unwrap();
    let response = client.send(&ApiRequest::get(url)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(sleeper.delays(), vec![Duration::from_secs(30)]);
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let transport = ScriptedTransport::new();
    let sleeper = RecordingSleeper::new();
    transport.respond("/v0/meta/bases/app1/tables", ApiResponse::status(403));

    let source = source(transport.clone(), sleeper.clone());
    let error = source
        .list_tables(&Base::new("app1", "CRM"))
        .await
        .unwrap_err();

    assert!(matches!(error, FetcherError::Client(ClientError::Fatal { .. })));
    assert_eq!(transport.requests().len(), 1);
    assert!(sleeper.delays().is_empty());
}
