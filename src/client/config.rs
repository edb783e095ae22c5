//! Client configuration constants

use rand::Rng;
use std::time::Duration;

/// Default Airtable REST endpoint for record reads.
pub const DEFAULT_API_BASE_URL: &str = "https://api.airtable.com/v0";

/// Default Airtable metadata endpoint for base and table enumeration.
pub const DEFAULT_META_BASE_URL: &str = "https://api.airtable.com/v0/meta";

/// Maximum number of retries for transient failures.
/// Three retries recover from short outages and rate limit bursts without
/// stalling a table for minutes on a persistent failure.
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Upper bound honored for a server-provided `Retry-After`.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Minimum interval between two requests to the API.
/// Airtable allows five requests per second per base.
pub const MIN_REQUEST_INTERVAL_MS: u64 = 100;

/// Per-request timeout applied by the HTTP transport.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap applied to the exponential delay
    pub max_backoff: Duration,
    /// Randomize each delay into `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Disable jitter (deterministic delays)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Exponential delay before jitter: `initial * 2^retry`, capped.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let initial_ms = self.initial_backoff.as_millis() as u64;
        let factor = 2u64.checked_pow(retry_count).unwrap_or(u64::MAX);
        let delay_ms = initial_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_backoff)
    }

    /// Delay to wait before retry number `retry_count + 1`.
    ///
    /// A server-provided `Retry-After` raises the delay to at least that
    /// value, bounded by [`MAX_RETRY_AFTER`].
    pub fn delay_for(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.base_delay(retry_count);
        let delay = if self.jitter {
            let full = base.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(full / 2..=full))
        } else {
            base
        };

        match retry_after {
            Some(hint) => delay.max(hint.min(MAX_RETRY_AFTER)),
            None => delay,
        }
    }
}
