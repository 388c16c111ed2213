//! Error types for the Rulekeeper service.

use thiserror::Error;

use crate::bulk::RemoteError;
use crate::ratelimit::LimiterError;
use crate::rules::StoreError;

/// Main error type for Rulekeeper operations.
#[derive(Error, Debug)]
pub enum RulekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiter errors
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] LimiterError),

    /// Remote rule service errors
    #[error("Remote rule service error: {0}")]
    Remote(#[from] RemoteError),

    /// Rule store errors, including failed sweeps
    #[error("Rule store error: {0}")]
    Store(#[from] StoreError),

    /// Storage backend errors
    #[error("Storage backend error: {0}")]
    Storage(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RulekeeperError {
    fn from(err: config::ConfigError) -> Self {
        RulekeeperError::Config(err.to_string())
    }
}

/// Result type alias for Rulekeeper operations.
pub type Result<T> = std::result::Result<T, RulekeeperError>;
