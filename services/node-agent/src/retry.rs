//! Retry policy and shutdown helpers.

use std::time::Duration;

use tokio::sync::watch;

/// Bounded exponential backoff.
///
/// `attempts` counts every try, the first included. The delay before retry
/// `n` (zero-based) is `initial_delay * 2^n`: 1s, 2s, 4s, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay,
        }
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.attempts
    }
}

/// True once shutdown has been signalled or the sender is gone.
pub fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Resolves when shutdown is signalled or the sender is dropped.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `delay`. Returns `false` if shutdown arrived first.
pub async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = wait_for_shutdown(shutdown) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
