//! Minimum-interval rate limiting
//!
//! Token bucket of one: a request may start only once the configured interval
//! has elapsed since the previous request started.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::Sleeper;

/// Rate limiter enforcing a fixed minimum interval between requests
#[derive(Debug)]
pub struct MinIntervalLimiter {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MinIntervalLimiter {
    /// Create a limiter
    ///
    /// # Arguments
    /// * `interval` - Minimum spacing between two request starts
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may start, then claim the slot.
    ///
    /// The lock is held across the wait so concurrent callers are serialized.
    ///
    /// # Returns
    /// The delay that was applied (zero when no wait was needed)
    pub async fn acquire(&self, sleeper: &dyn Sleeper) -> Duration {
        let mut last = self.last_request.lock().await;

        let wait = match *last {
            Some(previous) => self.interval.saturating_sub(previous.elapsed()),
            None => Duration::ZERO,
        };

        if !wait.is_zero() {
            sleeper.sleep(wait).await;
        }

        *last = Some(Instant::now());
        wait
    }
}
