//! Mapping of request failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::ratelimit::LimiterError;
use crate::rules::{StoreError, ValidationError};

/// Failure of an API request. Every variant short-circuits the middleware
/// chain and renders as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing X-User-ID header")]
    MissingTenant,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Rate limit exceeded [rate_limit_period={period_secs}][rate_limit_request={limit}]")]
    RateLimited { period_secs: u64, limit: u64 },

    #[error("Rate limiter unavailable")]
    LimiterUnavailable(#[from] LimiterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingTenant => StatusCode::UNAUTHORIZED,
            ApiError::Validation(ValidationError::EmptyCustomerId) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::LimiterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Conflict { .. }) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}
