//! Redis-backed counter store.
//!
//! Counters shared through Redis let every service instance enforce the same
//! per-tenant window. Connections go through `redis::aio::ConnectionManager`,
//! which reconnects on its own after Redis comes back; see
//! [`crate::storage::redis_connection`] for the timeouts applied to it.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use std::fmt;
use std::time::Duration;
use tracing::warn;

use super::backend::{CounterStore, CounterStoreError};

/// Increments a counter and attaches the window TTL in one server-side step.
///
/// A key found without a TTL (left behind by a non-atomic writer) gets one
/// as well, so it cannot pin a tenant over the limit indefinitely.
const INCREMENT_IN_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter store on a shared Redis server.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    increment_script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment_script: Script::new(INCREMENT_IN_WINDOW),
        }
    }
}

fn store_unreachable(err: RedisError) -> CounterStoreError {
    warn!(error = %err, "Redis counter store call failed");
    CounterStoreError::Unreachable(err.to_string())
}

/// Redis expiries have whole-second granularity and must be positive.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection.clone();
        let count: u64 = conn.incr(key, 1u64).await.map_err(store_unreachable)?;
        Ok(count)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), CounterStoreError> {
        let mut conn = self.connection.clone();
        conn.expire::<_, ()>(key, ttl_secs(ttl) as i64)
            .await
            .map_err(store_unreachable)?;
        Ok(())
    }

    async fn increment_in_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection.clone();
        let count: u64 = self
            .increment_script
            .key(key)
            .arg(ttl_secs(window))
            .invoke_async(&mut conn)
            .await
            .map_err(store_unreachable)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_is_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
    }
}
