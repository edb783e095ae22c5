//! Graceful shutdown coordination utilities.
//!
//! Provides a lightweight [`ShutdownCoordinator`] that is passed to the
//! orchestrator to request early termination. Interruption is observed at
//! batch boundaries only, so every open sink can still be closed cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Exit code used when a second interrupt forces termination
pub const FORCED_EXIT_CODE: i32 = 130;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    ///
    /// # Returns
    /// `true` if this call was the first request
    pub fn request_shutdown(&self) -> bool {
        let first = !self.is_shutdown.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request between the two
        // cannot be missed.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Listen for Ctrl+C: the first press requests a graceful shutdown, the
/// second exits the process immediately.
pub fn install_ctrl_c_handler(shutdown: SharedShutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if shutdown.request_shutdown() {
                warn!("Interrupt received, finishing the current batch (press Ctrl+C again to force exit)");
            } else {
                warn!("Second interrupt received, exiting immediately");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_when_already_requested() {
        let shutdown = ShutdownCoordinator::new();
        assert!(shutdown.request_shutdown());
        assert!(!shutdown.request_shutdown());
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waiters_are_woken() {
        let shutdown = ShutdownCoordinator::shared();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait_for_shutdown().await })
        };
        tokio::task::yield_now().await;
        shutdown.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_shutdown_requested());
    }
}
