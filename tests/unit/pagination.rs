//! Record pagination follows `offset` until the API stops returning one

use futures_util::StreamExt;
use serde_json::json;

use airtable_backup::fetcher::WorkspaceSource;
use airtable_backup::{Base, Table};

use crate::integration::support::{record, source, RecordingSleeper, ScriptedTransport};

fn query_value(query: &[(String, String)], key: &str) -> Option<String> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

#[tokio::test]
async fn test_records_follow_offsets() {
    let transport = ScriptedTransport::new();
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [record("rec1", json!({})), record("rec2", json!({}))], "offset": "itr1"}),
    );
    transport.respond_json(
        "/v0/app1/tbl1",
        json!({"records": [record("rec3", json!({}))], "offset": "itr2"}),
    );
    transport.respond_json("/v0/app1/tbl1", json!({"records": []}));

    let source = source(transport.clone(), RecordingSleeper::new());
    let batches: Vec<_> = source
        .fetch_records(&Base::new("app1", "CRM"), &Table::new("tbl1", "Deals"))
        .await
        .unwrap()
        .collect()
        .await;

    let pages: Vec<(u32, usize)> = batches
        .into_iter()
        .map(|batch| {
            let batch = batch.unwrap();
            (batch.page, batch.records.len())
        })
        .collect();
    assert_eq!(pages, vec![(1, 2), (2, 1), (3, 0)]);

    let requests = transport.requests_to("/v0/app1/tbl1");
    assert_eq!(requests.len(), 3);
    let offsets: Vec<Option<String>> = requests
        .iter()
        .map(|r| query_value(&r.query, "offset"))
        .collect();
    assert_eq!(offsets, vec![None, Some("itr1".into()), Some("itr2".into())]);
    assert!(requests
        .iter()
        .all(|r| query_value(&r.query, "pageSize").as_deref() == Some("100")));
}

#[tokio::test]
async fn test_page_size_is_clamped() {
    let transport = ScriptedTransport::new();
    transport.respond_json("/v0/app1/tbl1", json!({"records": []}));

    let source = source(transport.clone(), RecordingSleeper::new()).with_page_size(500);
    let _: Vec<_> = source
        .fetch_records(&Base::new("app1", "CRM"), &Table::new("tbl1", "Deals"))
        .await
        .unwrap()
        .collect()
        .await;

    let request = &transport.requests_to("/v0/app1/tbl1")[0];
    assert_eq!(query_value(&request.query, "pageSize").as_deref(), Some("100"));
}

#[tokio::test]
async fn test_bases_follow_offsets() {
    let transport = ScriptedTransport::new();
    transport.respond_json(
        "/v0/meta/bases",
        json!({"bases": [{"id": "app1", "name": "CRM"}], "offset": "itrB"}),
    );
    transport.respond_json(
        "/v0/meta/bases",
        json!({"bases": [{"id": "app2", "name": "Ops"}]}),
    );

    let source = source(transport.clone(), RecordingSleeper::new());
    let bases = source.list_bases().await.unwrap();

    let ids: Vec<&str> = bases.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["app1", "app2"]);
    let second = &transport.requests_to("/v0/meta/bases")[1];
    assert_eq!(query_value(&second.query, "offset").as_deref(), Some("itrB"));
}

#[tokio::test]
async fn test_tables_follow_offsets() {
    let transport = ScriptedTransport::new();
    transport.respond_json(
        "/v0/meta/bases/app1/tables",
        json!({"tables": [{"id": "tbl1", "name": "Deals"}], "offset": "itrT"}),
    );
    transport.respond_json(
        "/v0/meta/bases/app1/tables",
        json!({"tables": [{"id": "tbl2", "name": "Tasks"}]}),
    );

    let source = source(transport.clone(), RecordingSleeper::new());
    let tables = source.list_tables(&Base::new("app1", "CRM")).await.unwrap();

    let ids: Vec<&str> = tables.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["tbl1", "tbl2"]);
    let requests = transport.requests_to("/v0/meta/bases/app1/tables");
    assert_eq!(requests.len(), 2);
    assert_eq!(query_value(&requests[0].query, "offset"), None);
    assert_eq!(query_value(&requests[1].query, "offset").as_deref(), Some("itrT"));
}
