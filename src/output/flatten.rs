//! Tabular projection of schema-less records, shared by the csv and parquet sinks
//!
//! The column set is fixed by the first non-empty batch. Anything that does not
//! fit it later (new fields, objects, nested lists) is kept losslessly in the
//! `_overflow` column as a JSON object.

use serde_json::{Map, Value};
use std::collections::HashSet;

use super::SinkWarning;
use crate::{FieldValue, Record};

/// Record identifier column
pub const ID_COLUMN: &str = "id";

/// Creation time column
pub const CREATED_TIME_COLUMN: &str = "createdTime";

/// Column holding fields that do not fit the fixed layout
pub const OVERFLOW_COLUMN: &str = "_overflow";

/// Separator for flattened list items
pub const LIST_SEPARATOR: &str = "; ";

fn flatten_item(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Scalar(Value::Null) => Some(String::new()),
        FieldValue::Scalar(Value::String(text)) => Some(text.clone()),
        FieldValue::Scalar(other) => Some(other.to_string()),
        FieldValue::Attachment(attachment) => Some(attachment.url.clone()),
        FieldValue::List(_) | FieldValue::Object(_) => None,
    }
}

/// Flatten a value to a single cell.
///
/// Returns `None` for objects and for lists holding objects or lists.
pub fn flatten(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::List(items) => {
            let parts: Option<Vec<String>> = items.iter().map(flatten_item).collect();
            parts.map(|parts| parts.join(LIST_SEPARATOR))
        }
        other => flatten_item(other),
    }
}

/// Fixed column set of one tabular sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    fields: Vec<String>,
    known: HashSet<String>,
}

impl ColumnLayout {
    /// Field columns in first-seen order across `records`.
    ///
    /// Fields named like a reserved column are left to the overflow column.
    pub fn from_records(records: &[Record]) -> Self {
        let mut fields = Vec::new();
        let mut known = HashSet::new();
        for record in records {
            for name in record.fields.names() {
                if is_reserved(name) || known.contains(name) {
                    continue;
                }
                known.insert(name.to_string());
                fields.push(name.to_string());
            }
        }
        Self { fields, known }
    }

    /// Layout with no field columns
    pub fn empty() -> Self {
        Self::from_records(&[])
    }

    /// Field column names
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Full header: `id, createdTime, <fields>, _overflow`
    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.fields.len() + 3);
        header.push(ID_COLUMN.to_string());
        header.push(CREATED_TIME_COLUMN.to_string());
        header.extend(self.fields.iter().cloned());
        header.push(OVERFLOW_COLUMN.to_string());
        header
    }

    /// Project a record onto the layout.
    ///
    /// # Returns
    /// One cell per header column (`None` for absent values) and, when any
    /// field went to the overflow column, a warning naming those fields
    pub fn project(&self, record: &Record) -> (Vec<Option<String>>, Option<SinkWarning>) {
        let mut row = Vec::with_capacity(self.fields.len() + 3);
        row.push(Some(record.id.clone()));
        row.push(record.created_time.clone());

        let mut overflow = Map::new();
        for name in &self.fields {
            let cell = match record.fields.get(name) {
                None => None,
                Some(value) => match flatten(value) {
                    Some(text) => Some(text),
                    None => {
                        overflow.insert(name.clone(), value.to_json());
                        None
                    }
                },
            };
            row.push(cell);
        }

        for (name, value) in record.fields.iter() {
            if !self.known.contains(name) {
                overflow.insert(name.to_string(), value.to_json());
            }
        }

        if overflow.is_empty() {
            row.push(None);
            return (row, None);
        }

        let names: Vec<&str> = overflow.keys().map(String::as_str).collect();
        let warning = SinkWarning {
            record_id: record.id.clone(),
            message: format!("fields moved to {OVERFLOW_COLUMN}: {}", names.join(", ")),
        };
        row.push(Some(Value::Object(overflow).to_string()));
        (row, Some(warning))
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, ID_COLUMN | CREATED_TIME_COLUMN | OVERFLOW_COLUMN)
}
