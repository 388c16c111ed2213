//! Counter store trait for abstracting local and shared counter backends.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a counter store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterStoreError {
    /// The store could not be reached or rejected the command.
    #[error("Counter store unreachable: {0}")]
    Unreachable(String),

    /// The store did not answer in time.
    #[error("Counter store did not answer within {0:?}")]
    Timeout(Duration),
}

/// A key-value store with atomic increments and key expiry.
///
/// Counter state lives entirely in the store; callers never cache it, so
/// several service instances may share one store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`, creating it at zero if missing, and return
    /// the new value.
    async fn increment(&self, key: &str) -> Result<u64, CounterStoreError>;

    /// Expire `key` after `ttl`.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), CounterStoreError>;

    /// Increment `key` and make sure a window of length `window` is attached
    /// to it when the increment opened a new window.
    ///
    /// The provided implementation issues two separate commands. A crash
    /// between them, or a lost expiry call, leaves the key without a TTL and
    /// the tenant limited forever. Stores that can do both in one atomic step
    /// override this.
    async fn increment_in_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<u64, CounterStoreError> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.set_expiry(key, window).await?;
        }
        Ok(count)
    }
}
