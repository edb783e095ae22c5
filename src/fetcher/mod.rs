//! Paginated record fetching

use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;

use crate::client::ClientError;
use crate::{Base, Record, Table};

pub mod airtable;
pub mod pagination;

pub use airtable::AirtableSource;

/// Fetcher errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetcherError {
    /// Request failed after the client's retry policy
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Endpoint URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Cursor loop or runaway pagination
    #[error("pagination error: {0}")]
    Pagination(String),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One page of records. Batches are the unit of fan-out to sinks and are
/// never split further.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    /// Owning base identifier
    pub base_id: String,
    /// Table identifier, stable across pages
    pub table_id: String,
    /// 1-based page number within this fetch
    pub page: u32,
    /// Records in API order
    pub records: Vec<Record>,
}

impl RecordBatch {
    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the page carried no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lazy, finite stream of record batches. A fatal error is the last item.
pub type BatchStream = Pin<Box<dyn Stream<Item = FetcherResult<RecordBatch>> + Send>>;

/// Read access to a workspace
#[async_trait]
pub trait WorkspaceSource: Send + Sync {
    /// Enumerate every base visible to the credential
    async fn list_bases(&self) -> FetcherResult<Vec<Base>>;

    /// Enumerate the tables of a base
    async fn list_tables(&self, base: &Base) -> FetcherResult<Vec<Table>>;

    /// Start a fresh fetch of a table's records
    ///
    /// # Returns
    /// Stream of batches; each call restarts from the first page
    async fn fetch_records(&self, base: &Base, table: &Table) -> FetcherResult<BatchStream>;
}
