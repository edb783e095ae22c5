//! SQLite writer: one database per base, one table per source table
//!
//! Columns are added with `ALTER TABLE ... ADD COLUMN` as fields are first
//! seen. Each batch is written in a single transaction, so a failed batch
//! leaves no partial rows behind.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::flatten::LIST_SEPARATOR;
use super::{OutputError, OutputResult, RecordSink, SinkFormat, SinkSummary, SinkWarning};
use crate::fetcher::RecordBatch;
use crate::FieldValue;

const ID_COLUMN: &str = "id";
const CREATED_TIME_COLUMN: &str = "created_time";

fn sqlite_err(context: &str) -> impl Fn(rusqlite::Error) -> OutputError + '_ {
    move |e| OutputError::SqliteError(format!("{}: {}", context, e))
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Field name to column name mapping. SQLite compares column names without
/// case, so uniqueness is enforced on the lowercase form.
#[derive(Debug, Clone)]
struct Columns {
    by_field: HashMap<String, String>,
    taken: HashSet<String>,
}

impl Columns {
    fn new() -> Self {
        Self {
            by_field: HashMap::new(),
            taken: [ID_COLUMN, CREATED_TIME_COLUMN]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Column for a field, and whether it has to be created
    fn column_for(&mut self, field: &str) -> (String, bool) {
        if let Some(column) = self.by_field.get(field) {
            return (column.clone(), false);
        }

        let base = if field.is_empty() { "field" } else { field };
        let mut column = base.to_string();
        let mut counter = 2u32;
        while self.taken.contains(&column.to_lowercase()) {
            column = format!("{base}_{counter}");
            counter += 1;
        }

        self.taken.insert(column.to_lowercase());
        self.by_field.insert(field.to_string(), column.clone());
        (column, true)
    }
}

/// Map a field value onto a native SQLite value.
///
/// Attachment lists become their URLs joined by `"; "`; other lists and
/// objects are stored as JSON text.
pub fn to_sql_value(value: &FieldValue) -> SqlValue {
    match value {
        FieldValue::Scalar(Value::Null) => SqlValue::Null,
        FieldValue::Scalar(Value::Bool(flag)) => SqlValue::Integer(i64::from(*flag)),
        FieldValue::Scalar(Value::Number(number)) => match number.as_i64() {
            Some(int) => SqlValue::Integer(int),
            None => number
                .as_f64()
                .map(SqlValue::Real)
                .unwrap_or_else(|| SqlValue::Text(number.to_string())),
        },
        FieldValue::Scalar(Value::String(text)) => SqlValue::Text(text.clone()),
        FieldValue::Scalar(other) => SqlValue::Text(other.to_string()),
        FieldValue::Attachment(attachment) => SqlValue::Text(attachment.url.clone()),
        FieldValue::List(items)
            if !items.is_empty()
                && items.iter().all(|item| matches!(item, FieldValue::Attachment(_))) =>
        {
            let urls: Vec<&str> = value
                .attachments()
                .into_iter()
                .map(|a| a.url.as_str())
                .collect();
            SqlValue::Text(urls.join(LIST_SEPARATOR))
        }
        FieldValue::List(_) | FieldValue::Object(_) => SqlValue::Text(value.to_json().to_string()),
    }
}

/// SQLite sink for one table
pub struct SqliteSink {
    conn: Connection,
    path: PathBuf,
    table: String,
    columns: Columns,
    records_written: u64,
}

impl SqliteSink {
    /// Open the base database and recreate the table
    ///
    /// # Arguments
    /// * `path` - Database file of the base
    /// * `table` - SQL-safe table name
    pub fn new(path: &Path, table: &str) -> OutputResult<Self> {
        info!("Creating SQLite writer: path={}, table={}", path.display(), table);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(sqlite_err("Failed to open database"))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(sqlite_err("Failed to configure database"))?;

        let quoted = quote(table);
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {quoted};
             CREATE TABLE {quoted} ({} TEXT PRIMARY KEY, {} TEXT);",
            quote(ID_COLUMN),
            quote(CREATED_TIME_COLUMN)
        ))
        .map_err(sqlite_err("Failed to create table"))?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            table: table.to_string(),
            columns: Columns::new(),
            records_written: 0,
        })
    }

    /// Column names added so far, by field name
    pub fn column_for_field(&self, field: &str) -> Option<&str> {
        self.columns.by_field.get(field).map(String::as_str)
    }
}

impl RecordSink for SqliteSink {
    fn format(&self) -> SinkFormat {
        SinkFormat::Sqlite
    }

    fn write_batch(&mut self, batch: &RecordBatch) -> OutputResult<Vec<SinkWarning>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // Column additions roll back with the transaction, so work on a copy.
        let mut columns = self.columns.clone();
        let table = quote(&self.table);
        let tx = self
            .conn
            .transaction()
            .map_err(sqlite_err("Failed to begin transaction"))?;

        for record in &batch.records {
            let mut names = vec![quote(ID_COLUMN), quote(CREATED_TIME_COLUMN)];
            let mut values = vec![
                SqlValue::Text(record.id.clone()),
                record
                    .created_time
                    .clone()
                    .map(SqlValue::Text)
                    .unwrap_or(SqlValue::Null),
            ];

            for (field, value) in record.fields.iter() {
                let (column, is_new) = columns.column_for(field);
                if is_new {
                    tx.execute(
                        &format!("ALTER TABLE {table} ADD COLUMN {}", quote(&column)),
                        [],
                    )
                    .map_err(sqlite_err("Failed to add column"))?;
                    debug!(table = %self.table, column = %column, "Column added");
                }
                names.push(quote(&column));
                values.push(to_sql_value(value));
            }

            let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
                names.join(", "),
                placeholders.join(", ")
            );
            tx.execute(&sql, params_from_iter(values)).map_err(|e| {
                OutputError::SqliteError(format!("Failed to insert record {}: {}", record.id, e))
            })?;
        }

        tx.commit().map_err(sqlite_err("Failed to commit batch"))?;
        self.columns = columns;
        self.records_written += batch.records.len() as u64;
        Ok(Vec::new())
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }

    fn close(self: Box<Self>) -> OutputResult<SinkSummary> {
        let SqliteSink {
            conn,
            path,
            records_written,
            ..
        } = *self;

        conn.close()
            .map_err(|(_, e)| OutputError::SqliteError(format!("Failed to close database: {}", e)))?;

        Ok(SinkSummary {
            format: SinkFormat::Sqlite,
            records_written,
            path,
        })
    }
}
