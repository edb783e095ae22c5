//! Rate-limited HTTP client
//!
//! - [`Transport`] performs a single HTTP exchange ([`ReqwestTransport`] in production)
//! - [`Sleeper`] abstracts waiting so backoff is testable without real delay
//! - [`RateLimitedClient`] enforces the request interval and retries transient failures

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub mod config;
pub mod http;
pub mod rate_limit;
pub mod retry;

pub use config::RetryPolicy;
pub use http::RateLimitedClient;
pub use retry::FailureKind;

/// Client errors.
///
/// `Transient` failures are retried inside [`RateLimitedClient::send`]; callers
/// only ever observe them from [`RateLimitedClient::send_once`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Retryable failure (timeout, 429, 5xx)
    #[error("transient {kind}: {message}")]
    Transient {
        /// Classification
        kind: FailureKind,
        /// Detail from the transport or response body
        message: String,
        /// Server-provided retry hint
        retry_after: Option<Duration>,
    },

    /// Non-retryable failure (401/403, other 4xx, malformed body)
    #[error("fatal {kind}: {message}")]
    Fatal {
        /// Classification
        kind: FailureKind,
        /// Detail from the response body
        message: String,
    },

    /// Transient failures persisted past the retry ceiling
    #[error("giving up after {attempts} attempts, last error {kind}: {message}")]
    RetriesExhausted {
        /// Total attempts made
        attempts: u32,
        /// Classification of the last failure
        kind: FailureKind,
        /// Detail of the last failure
        message: String,
    },

    /// Client could not be constructed
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether the failure may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient { .. })
    }

    /// Whether the failure is final for the request
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    /// Failure classification, if known
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ClientError::Transient { kind, .. }
            | ClientError::Fatal { kind, .. }
            | ClientError::RetriesExhausted { kind, .. } => Some(*kind),
            ClientError::Configuration(_) => None,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Transport-level failure (no HTTP status was received)
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other I/O failure while sending or reading the body
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    fn kind(&self) -> FailureKind {
        match self {
            TransportError::Timeout(_) => FailureKind::NetworkTimeout,
            TransportError::Connect(_) => FailureKind::NetworkOffline,
            TransportError::Other(_) => FailureKind::NetworkGeneric,
        }
    }
}

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL
    pub url: Url,
    /// Query parameters
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    /// GET request for a URL
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            query: Vec::new(),
        }
    }

    /// Append a query parameter
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A fully-read response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed `Retry-After` header (seconds form)
    pub retry_after: Option<Duration>,
    /// Response body
    pub body: Bytes,
}

impl ApiResponse {
    /// Successful response with a body, mostly useful for scripted transports
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Response with an arbitrary status and empty body
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
            body: Bytes::new(),
        }
    }

    /// Deserialize the body as JSON
    ///
    /// # Errors
    /// Returns a fatal [`FailureKind::Decode`] error when the body does not match `T`
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Fatal {
            kind: FailureKind::Decode,
            message: format!("Failed to deserialize response: {e}"),
        })
    }

    /// Body as lossy UTF-8, truncated for error messages
    pub fn body_excerpt(&self) -> String {
        const MAX_EXCERPT: usize = 300;
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        match text.char_indices().nth(MAX_EXCERPT) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None => text.to_string(),
        }
    }
}

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute the request, attaching a bearer token when provided
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, TransportError>;
}

/// Production transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the given per-request timeout
    ///
    /// # Errors
    /// Returns [`ClientError::Configuration`] if the TLS backend cannot be initialized
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("airtable-backup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .query(&request.query);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(ApiResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Waiting abstraction used by the rate limiter and the backoff loop.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
