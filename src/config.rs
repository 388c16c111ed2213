//! Configuration management for Rulekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, RulekeeperError};

/// Prefix for environment variable overrides, e.g. `RULEKEEPER__STORAGE__REDIS_URL`.
const ENV_PREFIX: &str = "RULEKEEPER";

/// Main configuration for the Rulekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote rule service used by bulk operations
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Expired rule sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Backing store configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Remote rule service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL that rule paths are appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/multi_tenant_rule_management/".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests admitted per tenant within one window
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length in seconds
    #[serde(default = "default_period")]
    pub period_secs: u64,

    /// Longest wait for the counter store before a request is rejected as
    /// unavailable, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
}

impl RateLimitingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            period_secs: default_period(),
            store_timeout_ms: default_store_timeout(),
        }
    }
}

fn default_requests() -> u64 {
    100
}

fn default_period() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    2_000
}

/// Expired rule sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds to sleep between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    600
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Redis URL for rules, the audit trail and rate limit counters. When
    /// unset, everything is kept in process memory and lost on restart.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix of every Redis key written by the service
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Redis connection attempt timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Redis command response timeout in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,

    /// Audit entries retained; older entries are discarded
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl StorageConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            response_timeout_ms: default_response_timeout(),
            audit_capacity: default_audit_capacity(),
        }
    }
}

fn default_key_prefix() -> String {
    "rulekeeper:".to_string()
}

fn default_connect_timeout() -> u64 {
    2_000
}

fn default_response_timeout() -> u64 {
    1_000
}

fn default_audit_capacity() -> usize {
    10_000
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `RULEKEEPER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| RulekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or spin the service.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("rate_limiting.period_secs", self.rate_limiting.period_secs),
            ("rate_limiting.store_timeout_ms", self.rate_limiting.store_timeout_ms),
            ("remote.request_timeout_ms", self.remote.request_timeout_ms),
            ("sweeper.interval_secs", self.sweeper.interval_secs),
            ("storage.connect_timeout_ms", self.storage.connect_timeout_ms),
            ("storage.response_timeout_ms", self.storage.response_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(RulekeeperError::Config(format!("{} must be greater than zero", field)));
            }
        }
        if self.storage.audit_capacity == 0 {
            return Err(RulekeeperError::Config(
                "storage.audit_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
