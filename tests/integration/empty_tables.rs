//! A sink closed without batches leaves a valid, empty file

use serde_json::Value;
use tempfile::TempDir;

use airtable_backup::output::{FormatWriterSet, SinkFormat, SinkOptions, TableTarget};
use airtable_backup::{Base, Table};

fn target(dir: &TempDir) -> TableTarget {
    TableTarget::new(
        dir.path().join("data"),
        Base::new("app1", "CRM"),
        Table::new("tbl1", "Empty Table"),
        "Empty Table",
    )
}

#[test]
fn test_every_sink_closes_empty() {
    let dir = TempDir::new().unwrap();
    let target = target(&dir);
    let formats = SinkFormat::available();

    let (set, failures) = FormatWriterSet::open(&formats, &target, &SinkOptions::default());
    assert!(failures.is_empty());
    let (summaries, failures) = set.close();
    assert!(failures.is_empty());
    assert_eq!(summaries.len(), formats.len());
    assert!(summaries.iter().all(|s| s.records_written == 0));

    let json: Vec<Value> =
        serde_json::from_str(&std::fs::read_to_string(target.path_for(SinkFormat::Json)).unwrap())
            .unwrap();
    assert!(json.is_empty());

    let yaml: Vec<serde_yaml::Value> =
        serde_yaml::from_str(&std::fs::read_to_string(target.path_for(SinkFormat::Yaml)).unwrap())
            .unwrap();
    assert!(yaml.is_empty());

    let ndjson = std::fs::read_to_string(target.path_for(SinkFormat::Ndjson)).unwrap();
    assert!(ndjson.is_empty());

    let mut csv = csv::Reader::from_path(target.path_for(SinkFormat::Csv)).unwrap();
    assert_eq!(
        csv.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["id", "createdTime", "_overflow"]
    );
    assert_eq!(csv.records().count(), 0);

    let db = rusqlite::Connection::open(target.path_for(SinkFormat::Sqlite)).unwrap();
    let rows: i64 = db
        .query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", target.sqlite_table()),
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rows, 0);

    #[cfg(feature = "parquet")]
    {
        use parquet::file::reader::{FileReader, SerializedFileReader};
        let file = std::fs::File::open(target.path_for(SinkFormat::Parquet)).unwrap();
        let reader = SerializedFileReader::new(file).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 0);
    }
}

#[test]
fn test_sqlite_tables_share_one_database_per_base() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().join("data");
    let base = Base::new("app1", "CRM");

    for (id, name) in [("tbl1", "Deals"), ("tbl2", "2024 Plans")] {
        let target = TableTarget::new(data.clone(), base.clone(), Table::new(id, name), name);
        let (set, failures) =
            FormatWriterSet::open(&[SinkFormat::Sqlite], &target, &SinkOptions::default());
        assert!(failures.is_empty());
        set.close();
    }

    let db = rusqlite::Connection::open(data.join("sqlite/app1.db")).unwrap();
    let mut statement = db
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let names: Vec<String> = statement
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(names, vec!["2024 Plans", "Deals"]);
}
