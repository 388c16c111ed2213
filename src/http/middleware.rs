//! Request interceptors run before the rule handlers.
//!
//! The chain is: tenant extraction, then rate limiting. Body validation
//! happens in the `ApiJson` and `ValidRule` extractors. Any stage can
//! short-circuit the request with an `ApiError`.

use axum::extract::{FromRequest, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::bulk::TENANT_HEADER;
use crate::rules::{CustomerId, RuleData};

/// Resolve the tenant from `X-User-ID` and store it in the request extensions.
pub async fn require_tenant(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let raw = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            debug!("Request without tenant header");
            ApiError::MissingTenant
        })?;
    let tenant = CustomerId::parse(raw).map_err(|_| ApiError::MissingTenant)?;

    request.extensions_mut().insert(tenant);
    Ok(next.run(request).await)
}

/// Count mutating requests against the tenant's rate limit window.
///
/// Reads are not limited. Over the limit the request is rejected with 429;
/// if the counter store is down it is rejected with 503.
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(*request.method(), Method::GET | Method::HEAD) {
        return Ok(next.run(request).await);
    }

    let tenant = request
        .extensions()
        .get::<CustomerId>()
        .cloned()
        .ok_or(ApiError::MissingTenant)?;

    let decision = state.rate_limiter.check(&tenant).await?;
    if !decision.allowed {
        warn!(customer_id = %tenant, count = decision.count, "Rejecting request over rate limit");
        return Err(ApiError::RateLimited {
            period_secs: decision.window.as_secs(),
            limit: decision.limit,
        });
    }

    Ok(next.run(request).await)
}

/// JSON body extractor whose rejection renders like every other `ApiError`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::InvalidBody(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// A rule body with a non-blank name and a parseable IP address.
pub struct ValidRule(pub RuleData);

impl<S> FromRequest<S> for ValidRule
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ApiJson(rule) = ApiJson::<RuleData>::from_request(req, state).await?;
        rule.validate()?;
        Ok(ValidRule(rule))
    }
}
