//! Fixed window rate limiter.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, trace};

use super::backend::{CounterStore, CounterStoreError};
use crate::config::RateLimitingConfig;
use crate::rules::CustomerId;

/// Prefix of the per-tenant counter keys.
const KEY_PREFIX: &str = "rate_limit";

/// Default bound on a single counter store round trip.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised while consulting the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// The counter store could not be consulted. Requests must be rejected.
    #[error("Rate limiter unavailable: {0}")]
    Unavailable(#[from] CounterStoreError),
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests seen in the current window, this one included
    pub count: u64,
    /// Requests admitted per window
    pub limit: u64,
    /// Window length
    pub window: Duration,
}

impl RateLimitDecision {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// Per-tenant fixed window rate limiter.
///
/// Holds no counter state of its own: every check increments the tenant's
/// counter in the store and reads the result back. When the store is
/// unreachable, or does not answer within the store timeout, the check fails
/// and callers must reject the request.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
    window: Duration,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a rate limiter admitting `limit` requests per `window` per tenant.
    pub fn new(store: Arc<dyn CounterStore>, limit: u64, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn from_config(store: Arc<dyn CounterStore>, config: &RateLimitingConfig) -> Self {
        Self::new(store, config.requests, config.period())
            .with_store_timeout(config.store_timeout())
    }

    /// Bound how long a check may wait on the counter store.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Counter key for a tenant.
    pub fn key_for(customer_id: &CustomerId) -> String {
        format!("{}:{}", KEY_PREFIX, customer_id)
    }

    /// Count this request against the tenant's window and decide admission.
    pub async fn check(&self, customer_id: &CustomerId) -> Result<RateLimitDecision, LimiterError> {
        let key = Self::key_for(customer_id);
        trace!(key = %key, "Checking rate limit");

        let count = tokio::time::timeout(
            self.store_timeout,
            self.store.increment_in_window(&key, self.window),
        )
        .await
        .map_err(|_| CounterStoreError::Timeout(self.store_timeout))
        .and_then(|result| result)
        .map_err(|e| {
            error!(customer_id = %customer_id, error = %e, "Rate limiter unavailable");
            LimiterError::from(e)
        })?;

        let allowed = count <= self.limit;
        if !allowed {
            debug!(customer_id = %customer_id, count, limit = self.limit, "Rate limit exceeded");
        }

        Ok(RateLimitDecision {
            allowed,
            count,
            limit: self.limit,
            window: self.window,
        })
    }

    /// Whether the tenant may issue one more request.
    pub async fn is_allowed(&self, customer_id: &CustomerId) -> Result<bool, LimiterError> {
        Ok(self.check(customer_id).await?.allowed)
    }
}
