//! Shared state of the HTTP handlers.

use std::sync::Arc;

use crate::bulk::{BulkResultAggregator, HttpRuleService, RuleOperationDispatcher};
use crate::config::ServiceConfig;
use crate::error::{Result, RulekeeperError};
use crate::ratelimit::{CounterStore, RateLimiter};
use crate::rules::RuleStore;

#[derive(Clone)]
pub struct AppState {
    pub rules: Arc<dyn RuleStore>,
    pub rate_limiter: RateLimiter,
    pub bulk: BulkResultAggregator,
}

impl AppState {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        rate_limiter: RateLimiter,
        bulk: BulkResultAggregator,
    ) -> Self {
        Self {
            rules,
            rate_limiter,
            bulk,
        }
    }

    /// Wire the state from configuration and the chosen stores.
    pub fn from_config(
        config: &ServiceConfig,
        rules: Arc<dyn RuleStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RulekeeperError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let service = Arc::new(HttpRuleService::new(client, config.remote.base_url.clone()));
        let dispatcher = RuleOperationDispatcher::new(service, config.remote.request_timeout());

        Ok(Self::new(
            rules,
            RateLimiter::from_config(counters, &config.rate_limiting),
            BulkResultAggregator::new(dispatcher),
        ))
    }
}
