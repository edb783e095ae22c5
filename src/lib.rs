//! # Airtable Backup Library
//!
//! Progressive, restartable backups of an entire Airtable workspace. Every
//! table is streamed page by page into several independent output encodings
//! while the attachments referenced by its records are downloaded alongside.
//!
//! ## Features
//!
//! - **Progressive output**: each fetched page is fanned out to every sink as it
//!   arrives, so a partial run still leaves valid files behind
//! - **Six sinks**: JSON array, YAML, NDJSON, CSV with an overflow column,
//!   SQLite and (behind the `parquet` feature) Parquet
//! - **Rate limiting and retries**: fixed minimum request interval with jittered
//!   exponential backoff for transient failures
//! - **Graceful degradation**: failures are recorded per record, attachment and
//!   table without aborting the rest of the workspace
//! - **Cooperative interruption**: Ctrl+C is observed between batches and every
//!   open sink is closed cleanly before the report is written
//!
//! ## Quick Start
//!
//! ```no_run
//! use airtable_backup::config::BackupConfig;
//! use airtable_backup::orchestrator::BackupOrchestrator;
//! use airtable_backup::shutdown::ShutdownCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BackupConfig::from_env()?;
//! let layout = config.layout(&std::env::current_dir()?, &chrono::Local::now());
//! let orchestrator =
//!     BackupOrchestrator::from_config(&config, layout, ShutdownCoordinator::shared())?;
//! let session = orchestrator.run().await?;
//! airtable_backup::report::write_outputs(session.layout(), &session)?;
//! println!("{} records backed up", session.total_records());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`client`] - Rate-limited HTTP client with a bounded retry state machine
//! - [`fetcher`] - Lazy, paginated record streams over the Airtable REST API
//! - [`output`] - Format sinks and the per-table writer set
//! - [`attachments`] - Bounded-concurrency attachment downloads
//! - [`session`] - Session aggregate, directory layout and error collection
//! - [`orchestrator`] - Base/table iteration and per-table state machine
//! - [`report`] - Metadata and human-readable summary generation

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attachment downloads
pub mod attachments;

/// CLI command implementations
pub mod cli;

/// HTTP client with rate limiting and retries
pub mod client;

/// Run configuration
pub mod config;

/// Paginated record fetching
pub mod fetcher;

/// Metrics collection and export
pub mod metrics;

/// Backup orchestration
pub mod orchestrator;

/// Format sinks
pub mod output;

/// Metadata and report generation
pub mod report;

/// Session state, layout and error collection
pub mod session;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// A base (top-level container) visible to the configured credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Base {
    /// Base identifier (e.g., "appXXXXXXXXXXXXXX")
    pub id: String,
    /// Display name
    pub name: String,
    /// Permission level granted to the token, when reported
    #[serde(
        rename = "permissionLevel",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub permission_level: Option<String>,
}

impl Base {
    /// Convenience constructor
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            permission_level: None,
        }
    }
}

/// A table within a base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table identifier (e.g., "tblXXXXXXXXXXXXXX")
    pub id: String,
    /// Table name, possibly containing characters unsafe for paths
    pub name: String,
    /// Primary field identifier, when reported
    #[serde(
        rename = "primaryFieldId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub primary_field_id: Option<String>,
}

impl Table {
    /// Convenience constructor
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            primary_field_id: None,
        }
    }
}

/// A binary file referenced from a record field.
///
/// The full JSON object is kept so that serializing the record again is
/// lossless (thumbnails, ids and MIME types survive untouched).
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Download URL
    pub url: String,
    /// Original filename, when present
    pub filename: Option<String>,
    /// Size in bytes, when present
    pub size: Option<u64>,
    raw: Map<String, Value>,
}

impl Attachment {
    /// Recognize an attachment object: any JSON object with a string `url`.
    pub fn from_object(object: &Map<String, Value>) -> Option<Self> {
        let url = object.get("url")?.as_str()?.to_string();
        Some(Self {
            url,
            filename: object
                .get("filename")
                .and_then(Value::as_str)
                .map(str::to_string),
            size: object.get("size").and_then(Value::as_u64),
            raw: object.clone(),
        })
    }

    /// The raw JSON object as received from the API
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

/// Tagged value of a single record field.
///
/// Field sets are schema-less: two records of the same table may carry
/// different fields, and the same field may hold different shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Null, boolean, number or string
    Scalar(Value),
    /// Ordered list of values
    List(Vec<FieldValue>),
    /// Nested object that is not an attachment
    Object(Fields),
    /// Attachment reference
    Attachment(Attachment),
}

impl FieldValue {
    /// Convert a JSON value into its tagged representation.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from_json).collect())
            }
            Value::Object(object) => match Attachment::from_object(&object) {
                Some(attachment) => FieldValue::Attachment(attachment),
                None => FieldValue::Object(Fields::from_json_map(object)),
            },
            scalar => FieldValue::Scalar(scalar),
        }
    }

    /// Convert back to a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Scalar(value) => value.clone(),
            FieldValue::List(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::Object(fields) => Value::Object(fields.to_json_map()),
            FieldValue::Attachment(attachment) => Value::Object(attachment.raw.clone()),
        }
    }

    /// Whether this value is a scalar
    pub fn is_scalar(&self) -> bool {
        matches!(self, FieldValue::Scalar(_))
    }

    /// Attachments held directly by this value or by its top-level list items.
    pub fn attachments(&self) -> Vec<&Attachment> {
        match self {
            FieldValue::Attachment(attachment) => vec![attachment],
            FieldValue::List(items) => items
                .iter()
                .filter_map(|item| match item {
                    FieldValue::Attachment(attachment) => Some(attachment),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Scalar(value) => value.serialize(serializer),
            FieldValue::List(items) => serializer.collect_seq(items),
            FieldValue::Object(fields) => fields.serialize(serializer),
            FieldValue::Attachment(attachment) => attachment.raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(FieldValue::from_json)
    }
}

/// Ordered mapping from field name to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields(Vec<(String, FieldValue)>);

impl Fields {
    /// Create an empty field set
    pub fn new() -> Self {
        Self(Vec::new())
    }

    fn from_json_map(map: Map<String, Value>) -> Self {
        map.into_iter()
            .map(|(name, value)| (name, FieldValue::from_json(value)))
            .collect()
    }

    fn to_json_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    /// Insert or replace a field, keeping first-insertion order.
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Iterate fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Field names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Fields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(map) => Ok(Fields::from_json_map(map)),
            Value::Null => Ok(Fields::new()),
            other => Err(de::Error::custom(format!(
                "expected an object of fields, got {other}"
            ))),
        }
    }
}

/// A single record with its dynamic field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier (e.g., "recXXXXXXXXXXXXXX")
    pub id: String,
    /// Creation timestamp as reported by the API
    #[serde(
        rename = "createdTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<String>,
    /// Field values
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    /// Convenience constructor
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            created_time: None,
            fields,
        }
    }

    /// All attachments referenced by this record, paired with their field name.
    pub fn attachments(&self) -> Vec<(&str, &Attachment)> {
        self.fields
            .iter()
            .flat_map(|(name, value)| {
                value
                    .attachments()
                    .into_iter()
                    .map(move |attachment| (name, attachment))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_parses_tagged_fields() {
        let record: Record = serde_json::from_value(json!({
            "id": "rec1",
            "createdTime": "2024-01-01T00:00:00.000Z",
            "fields": {
                "Name": "Alpha",
                "Tags": ["a", "b"],
                "Photos": [{"id": "att1", "url": "https://dl/1", "filename": "one.png", "size": 12}],
                "Meta": {"k": 1}
            }
        }))
        .unwrap();

        assert_eq!(record.fields.len(), 4);
        assert!(record.fields.get("Name").unwrap().is_scalar());
        assert!(matches!(record.fields.get("Tags"), Some(FieldValue::List(_))));
        assert!(matches!(record.fields.get("Meta"), Some(FieldValue::Object(_))));

        let attachments = record.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].0, "Photos");
        assert_eq!(attachments[0].1.filename.as_deref(), Some("one.png"));
        assert_eq!(attachments[0].1.size, Some(12));
    }

    #[test]
    fn test_record_serialization_is_lossless_and_ordered() {
        let raw = json!({
            "id": "rec1",
            "createdTime": "2024-01-01T00:00:00.000Z",
            "fields": {
                "Zeta": 1,
                "Alpha": [{"url": "https://dl/1", "thumbnails": {"small": {"url": "x"}}}],
                "Mid": null
            }
        });
        let record: Record = serde_json::from_value(raw.clone()).unwrap();
        let text = serde_json::to_string(&record).unwrap();

        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), raw);
        assert!(text.find("Zeta").unwrap() < text.find("Alpha").unwrap());
    }

    #[test]
    fn test_fields_insert_replaces_in_place() {
        let mut fields = Fields::new();
        fields.insert("a", FieldValue::Scalar(json!(1)));
        fields.insert("b", FieldValue::Scalar(json!(2)));
        fields.insert("a", FieldValue::Scalar(json!(3)));

        assert_eq!(fields.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(fields.get("a"), Some(&FieldValue::Scalar(json!(3))));
    }
}
