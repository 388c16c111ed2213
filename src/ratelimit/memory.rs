//! Process-local counter store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::backend::{CounterStore, CounterStoreError};

/// One counter and the instant it expires at, if any.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    expires_at: Option<Instant>,
}

impl WindowCounter {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Counter store held in process memory.
///
/// Counters are not shared between instances. Each key is updated under its
/// own map entry lock, which makes `increment_in_window` atomic.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, WindowCounter>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, or `None` if missing or expired.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count)
    }

    /// Remaining lifetime of `key`. `None` if the key is missing or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .get(key)
            .and_then(|counter| counter.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn bump(&self, key: &str, window: Option<Duration>) -> u64 {
        let now = Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert(WindowCounter {
            count: 0,
            expires_at: None,
        });

        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }

        entry.count += 1;
        if let Some(window) = window {
            if entry.count == 1 || entry.expires_at.is_none() {
                entry.expires_at = Some(now + window);
            }
        }
        entry.count
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, CounterStoreError> {
        Ok(self.bump(key, None))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), CounterStoreError> {
        if let Some(mut counter) = self.counters.get_mut(key) {
            counter.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn increment_in_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<u64, CounterStoreError> {
        Ok(self.bump(key, Some(window)))
    }
}
