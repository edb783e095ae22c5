//! Rate-limited HTTP client with a bounded retry state machine
//!
//! Provides a single entry point for every request the backup makes:
//! - Minimum interval between requests (shared across clones)
//! - Classification of each attempt into transient or fatal failures
//! - Jittered exponential backoff for transient failures
//! - Conversion of an exhausted retry budget into one final error

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::config::{RetryPolicy, MIN_REQUEST_INTERVAL_MS, REQUEST_TIMEOUT};
use super::rate_limit::MinIntervalLimiter;
use super::retry::{FailureKind, RetryContext};
use super::{
    ApiRequest, ApiResponse, ClientError, ClientResult, ReqwestTransport, Sleeper, TokioSleeper,
    Transport,
};
use crate::metrics;

/// HTTP client shared by every request of a backup run.
///
/// Cloning is cheap and clones share the same rate limiter.
#[derive(Clone)]
pub struct RateLimitedClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    limiter: Arc<MinIntervalLimiter>,
    policy: RetryPolicy,
    token: Option<Arc<str>>,
}

impl RateLimitedClient {
    /// Create a client from its parts
    ///
    /// # Arguments
    /// * `transport` - Performs the HTTP exchange
    /// * `sleeper` - Used for both interval waits and backoff delays
    /// * `min_interval` - Minimum spacing between two requests
    /// * `policy` - Retry ceiling and backoff bounds
    pub fn new(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        min_interval: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sleeper,
            limiter: Arc::new(MinIntervalLimiter::new(min_interval)),
            policy,
            token: None,
        }
    }

    /// Client over `reqwest` with default interval and retry policy
    ///
    /// # Errors
    /// Returns [`ClientError::Configuration`] if the HTTP stack cannot be built
    pub fn with_defaults() -> ClientResult<Self> {
        Ok(Self::new(
            Arc::new(ReqwestTransport::new(REQUEST_TIMEOUT)?),
            Arc::new(TokioSleeper),
            Duration::from_millis(MIN_REQUEST_INTERVAL_MS),
            RetryPolicy::default(),
        ))
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Arc::from(token.into()));
        self
    }

    /// Retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Configured minimum request interval
    pub fn min_interval(&self) -> Duration {
        self.limiter.interval()
    }

    /// Perform exactly one attempt and classify the outcome.
    ///
    /// # Errors
    /// Returns [`ClientError::Transient`] for timeouts, 429 and 5xx, and
    /// [`ClientError::Fatal`] for every other non-success status
    pub async fn send_once(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        let started = Instant::now();
        let outcome = self
            .transport
            .execute(request, self.token.as_deref())
            .await;
        let elapsed = started.elapsed();

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                metrics::record_api_request("network_error", elapsed);
                return Err(ClientError::Transient {
                    kind: e.kind(),
                    message: e.to_string(),
                    retry_after: None,
                });
            }
        };

        metrics::record_api_request(&response.status.to_string(), elapsed);

        match FailureKind::from_status(response.status) {
            None => Ok(response),
            Some(kind) if kind.is_retryable() => Err(ClientError::Transient {
                kind,
                message: response.body_excerpt(),
                retry_after: response.retry_after,
            }),
            Some(kind) => Err(ClientError::Fatal {
                kind,
                message: response.body_excerpt(),
            }),
        }
    }

    /// Send a request, waiting for the rate limiter and retrying transient failures.
    ///
    /// A run of transient failures shorter than the retry ceiling is absorbed;
    /// reaching the ceiling yields exactly one [`ClientError::RetriesExhausted`].
    ///
    /// # Errors
    /// Returns a fatal [`ClientError`] variant; never [`ClientError::Transient`]
    pub async fn send(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        let max_attempts = self.policy.max_retries + 1;
        let mut retries = 0u32;

        loop {
            self.limiter.acquire(self.sleeper.as_ref()).await;

            match self.send_once(request).await {
                Ok(response) => {
                    if retries > 0 {
                        debug!(
                            url = %request.url,
                            attempt = retries + 1,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(ClientError::Transient {
                    kind,
                    message,
                    retry_after,
                }) => {
                    if retries >= self.policy.max_retries {
                        let ctx = RetryContext {
                            attempt: retries + 1,
                            max_attempts,
                            kind,
                            backoff: Duration::ZERO,
                            endpoint: request.url.to_string(),
                        };
                        warn!("{}", ctx.format_failure());
                        return Err(ClientError::RetriesExhausted {
                            attempts: retries + 1,
                            kind,
                            message,
                        });
                    }

                    let backoff = self.policy.delay_for(retries, retry_after);
                    let ctx = RetryContext {
                        attempt: retries + 1,
                        max_attempts,
                        kind,
                        backoff,
                        endpoint: request.url.to_string(),
                    };
                    warn!(status = ?kind.status(), "{}", ctx.format_retry());
                    metrics::record_retry_backoff(backoff, retries + 1);

                    self.sleeper.sleep(backoff).await;
                    retries += 1;
                }
                Err(fatal) => {
                    warn!(url = %request.url, error = %fatal, "Request failed without retry");
                    return Err(fatal);
                }
            }
        }
    }

    /// Send a request and deserialize the JSON body
    ///
    /// # Errors
    /// Propagates [`RateLimitedClient::send`] errors and decode failures
    pub async fn get_json<T>(&self, request: &ApiRequest) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.send(request).await?.json()
    }
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("min_interval", &self.limiter.interval())
            .field("policy", &self.policy)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
