//! Run configuration
//!
//! [`BackupConfig`] is built from the environment and then adjusted by CLI
//! flags. It is passed explicitly into every constructor; nothing reads the
//! credential from global state.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::attachments::DEFAULT_CONCURRENCY;
use crate::client::config::{
    DEFAULT_API_BASE_URL, DEFAULT_META_BASE_URL, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRIES,
    MIN_REQUEST_INTERVAL_MS,
};
use crate::client::RetryPolicy;
use crate::fetcher::airtable::MAX_PAGE_SIZE;
use crate::output::{SinkFormat, SinkOptions, DEFAULT_PARQUET_MEMORY_CEILING};
use crate::session::SessionLayout;

/// Environment variable holding the personal access token
pub const ENV_API_TOKEN: &str = "AIRTABLE_API_TOKEN";

/// Environment variable overriding the records endpoint
pub const ENV_API_URL: &str = "AIRTABLE_API_URL";

/// Environment variable overriding the metadata endpoint
pub const ENV_META_URL: &str = "AIRTABLE_META_URL";

/// Accepted range for `max_retries`
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

/// Accepted range for `attachment_concurrency`
pub const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=32;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No token configured
    #[error("missing API token: set {ENV_API_TOKEN}")]
    MissingToken,

    /// A value is out of range or malformed
    #[error("invalid {field}: {message}")]
    Invalid {
        /// Offending setting
        field: &'static str,
        /// Why it was rejected
        message: String,
    },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// Settings of one backup run
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Personal access token
    #[serde(skip)]
    pub api_token: Option<String>,
    /// Records endpoint root
    pub api_base_url: String,
    /// Metadata endpoint root
    pub meta_base_url: String,
    /// Explicit output directory; a timestamped one is used otherwise
    pub output_dir: Option<PathBuf>,
    /// Enabled sinks
    pub formats: Vec<SinkFormat>,
    /// Minimum spacing between API requests
    pub min_request_interval: Duration,
    /// Retries per request after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap on the backoff delay
    pub max_backoff: Duration,
    /// Whether attachments are downloaded
    pub download_attachments: bool,
    /// Overwrite attachments that already exist
    pub redownload_existing: bool,
    /// Concurrent attachment downloads
    pub attachment_concurrency: usize,
    /// Buffered bytes before the parquet sink writes a row group
    pub parquet_memory_ceiling: usize,
    /// Records per API page
    pub page_size: u32,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            meta_base_url: DEFAULT_META_BASE_URL.to_string(),
            output_dir: None,
            formats: SinkFormat::available(),
            min_request_interval: Duration::from_millis(MIN_REQUEST_INTERVAL_MS),
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            download_attachments: true,
            redownload_existing: false,
            attachment_concurrency: DEFAULT_CONCURRENCY,
            parquet_memory_ceiling: DEFAULT_PARQUET_MEMORY_CEILING,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for BackupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupConfig")
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("meta_base_url", &self.meta_base_url)
            .field("output_dir", &self.output_dir)
            .field("formats", &self.formats)
            .field("min_request_interval", &self.min_request_interval)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("download_attachments", &self.download_attachments)
            .field("redownload_existing", &self.redownload_existing)
            .field("attachment_concurrency", &self.attachment_concurrency)
            .field("parquet_memory_ceiling", &self.parquet_memory_ceiling)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl BackupConfig {
    /// Defaults overlaid with the process environment
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if an endpoint override is empty
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.api_token = lookup(ENV_API_TOKEN)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        if let Some(url) = lookup(ENV_API_URL) {
            if url.trim().is_empty() {
                return Err(invalid("api_base_url", format!("{ENV_API_URL} is empty")));
            }
            config.api_base_url = url.trim().to_string();
        }
        if let Some(url) = lookup(ENV_META_URL) {
            if url.trim().is_empty() {
                return Err(invalid("meta_base_url", format!("{ENV_META_URL} is empty")));
            }
            config.meta_base_url = url.trim().to_string();
        }

        Ok(config)
    }

    /// Set the token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Token, required for commands that reach the API
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingToken`]
    pub fn require_token(&self) -> Result<&str, ConfigError> {
        self.api_token.as_deref().ok_or(ConfigError::MissingToken)
    }

    /// Check ranges and format availability
    ///
    /// # Errors
    /// Returns the first [`ConfigError::Invalid`] found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.formats.is_empty() {
            return Err(invalid("formats", "at least one format must be enabled"));
        }
        if let Some(format) = self.formats.iter().find(|f| !f.is_available()) {
            return Err(invalid(
                "formats",
                format!("'{format}' is not compiled into this build"),
            ));
        }
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            return Err(invalid(
                "max_retries",
                format!(
                    "{} is outside {}..={}",
                    self.max_retries,
                    MAX_RETRIES_RANGE.start(),
                    MAX_RETRIES_RANGE.end()
                ),
            ));
        }
        if !CONCURRENCY_RANGE.contains(&self.attachment_concurrency) {
            return Err(invalid(
                "attachment_concurrency",
                format!(
                    "{} is outside {}..={}",
                    self.attachment_concurrency,
                    CONCURRENCY_RANGE.start(),
                    CONCURRENCY_RANGE.end()
                ),
            ));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(invalid(
                "page_size",
                format!("{} is outside 1..={MAX_PAGE_SIZE}", self.page_size),
            ));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(invalid(
                "initial_backoff",
                "must not exceed max_backoff",
            ));
        }
        if self.parquet_memory_ceiling == 0 {
            return Err(invalid("parquet_memory_ceiling", "must be positive"));
        }
        Ok(())
    }

    /// Retry policy for API requests
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            jitter: true,
        }
    }

    /// Sink tuning
    pub fn sink_options(&self) -> SinkOptions {
        SinkOptions {
            parquet_memory_ceiling: self.parquet_memory_ceiling,
        }
    }

    /// Output tree for a run started at `started`.
    ///
    /// Uses `output_dir` when set, else `airtable_backup_{timestamp}` under `cwd`.
    pub fn layout<Tz: TimeZone>(&self, cwd: &Path, started: &DateTime<Tz>) -> SessionLayout
    where
        Tz::Offset: fmt::Display,
    {
        match &self.output_dir {
            Some(dir) => SessionLayout::new(dir.clone(), started),
            None => SessionLayout::timestamped(cwd, started),
        }
    }
}
