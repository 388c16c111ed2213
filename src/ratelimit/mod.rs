//! Per-tenant rate limiting backed by a shared counter store.

mod backend;
mod limiter;
mod memory;
mod redis_store;

pub use backend::{CounterStore, CounterStoreError};
pub use limiter::{LimiterError, RateLimitDecision, RateLimiter};
pub use memory::InMemoryCounterStore;
pub use redis_store::RedisCounterStore;
