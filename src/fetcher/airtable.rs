//! Airtable REST implementation of [`WorkspaceSource`]
//!
//! Endpoints:
//! - `GET {meta}/bases` → `{"bases": [...], "offset"?}`
//! - `GET {meta}/bases/{base_id}/tables` → `{"tables": [...], "offset"?}`
//! - `GET {api}/{base_id}/{table_id}?pageSize=..&offset=..` → `{"records": [...], "offset"?}`

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use super::pagination::{paginate, Page};
use super::{BatchStream, FetcherError, FetcherResult, RecordBatch, WorkspaceSource};
use crate::client::{ApiRequest, RateLimitedClient};
use crate::metrics;
use crate::{Base, Record, Table};

/// Maximum page size accepted by the records endpoint
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct BasesResponse {
    bases: Vec<Base>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    tables: Vec<Table>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    records: Vec<Record>,
    #[serde(default)]
    offset: Option<String>,
}

/// Workspace source backed by the Airtable REST API
#[derive(Debug, Clone)]
pub struct AirtableSource {
    client: RateLimitedClient,
    api_base: Url,
    meta_base: Url,
    page_size: u32,
}

impl AirtableSource {
    /// Create a source
    ///
    /// # Arguments
    /// * `client` - Authenticated, rate-limited client
    /// * `api_base` - Records endpoint root (e.g., "https://api.airtable.com/v0")
    /// * `meta_base` - Metadata endpoint root (e.g., "https://api.airtable.com/v0/meta")
    ///
    /// # Errors
    /// Returns [`FetcherError::InvalidUrl`] if either root cannot be parsed
    pub fn new(client: RateLimitedClient, api_base: &str, meta_base: &str) -> FetcherResult<Self> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|e| FetcherError::InvalidUrl(format!("{raw}: {e}")))
        };
        Ok(Self {
            client,
            api_base: parse(api_base)?,
            meta_base: parse(meta_base)?,
            page_size: MAX_PAGE_SIZE,
        })
    }

    /// Set the records page size (clamped to 1..=100)
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Append percent-encoded path segments to a root URL.
    ///
    /// Each segment is encoded on its own, so a `/` inside a name becomes `%2F`.
    pub fn endpoint(root: &Url, segments: &[&str]) -> FetcherResult<Url> {
        let mut url = root.clone();
        url.path_segments_mut()
            .map_err(|_| FetcherError::InvalidUrl(format!("{root} cannot be a base URL")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Follow a metadata listing through every page
    async fn collect_listing<R, T>(
        &self,
        url: Url,
        split: fn(R) -> Page<T>,
    ) -> FetcherResult<Vec<T>>
    where
        R: DeserializeOwned + Send + 'static,
        T: Send,
    {
        let client = self.client.clone();
        let mut pages = Box::pin(paginate(move |offset: Option<String>| {
            let client = client.clone();
            let mut request = ApiRequest::get(url.clone());
            if let Some(offset) = offset {
                request = request.with_query("offset", offset);
            }
            async move {
                let response: R = client.get_json(&request).await?;
                Ok(split(response))
            }
        }));

        let mut items = Vec::new();
        while let Some(page) = pages.next().await {
            let (_, page_items) = page?;
            items.extend(page_items);
        }
        Ok(items)
    }

    /// URL of a table's records
    pub fn records_url(&self, base_id: &str, table_id: &str) -> FetcherResult<Url> {
        Self::endpoint(&self.api_base, &[base_id, table_id])
    }
}

#[async_trait]
impl WorkspaceSource for AirtableSource {
    async fn list_bases(&self) -> FetcherResult<Vec<Base>> {
        let url = Self::endpoint(&self.meta_base, &["bases"])?;
        let bases = self
            .collect_listing(url, |response: BasesResponse| Page {
                items: response.bases,
                offset: response.offset,
            })
            .await?;

        info!(bases = bases.len(), "Fetched accessible bases");
        Ok(bases)
    }

    async fn list_tables(&self, base: &Base) -> FetcherResult<Vec<Table>> {
        let url = Self::endpoint(&self.meta_base, &["bases", &base.id, "tables"])?;
        let tables = self
            .collect_listing(url, |response: TablesResponse| Page {
                items: response.tables,
                offset: response.offset,
            })
            .await?;

        debug!(base_id = %base.id, tables = tables.len(), "Fetched tables");
        Ok(tables)
    }

    async fn fetch_records(&self, base: &Base, table: &Table) -> FetcherResult<BatchStream> {
        let url = self.records_url(&base.id, &table.id)?;
        let client = self.client.clone();
        let page_size = self.page_size.to_string();

        let pages = paginate(move |offset: Option<String>| {
            let client = client.clone();
            let mut request =
                ApiRequest::get(url.clone()).with_query("pageSize", page_size.clone());
            if let Some(offset) = offset {
                request = request.with_query("offset", offset);
            }
            async move {
                let response: RecordsResponse = client.get_json(&request).await?;
                Ok(Page {
                    items: response.records,
                    offset: response.offset,
                })
            }
        });

        let base_id = base.id.clone();
        let table_id = table.id.clone();
        let batches = pages.map(move |page| {
            page.map(|(number, records)| {
                metrics::record_records_fetched(records.len());
                debug!(
                    base_id = %base_id,
                    table_id = %table_id,
                    page = number,
                    records = records.len(),
                    "Fetched records page"
                );
                RecordBatch {
                    base_id: base_id.clone(),
                    table_id: table_id.clone(),
                    page: number,
                    records,
                }
            })
        });

        Ok(Box::pin(batches))
    }
}
