//! Rule management handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;
use tracing::{info, instrument};

use super::error::ApiError;
use super::middleware::{ApiJson, ValidRule};
use super::state::AppState;
use crate::rules::{BulkRequest, CustomerId};

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[instrument(skip_all, fields(customer_id = %tenant, rule_name = %rule_name))]
pub async fn get_rule(
    State(state): State<AppState>,
    Extension(tenant): Extension<CustomerId>,
    Path(rule_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    crate::rules::validate_rule_name(&rule_name)?;
    let record = state.rules.get(&tenant, &rule_name).await?;
    Ok(Json(json!({ "rule": record.to_rule_data() })))
}

#[instrument(skip_all, fields(customer_id = %tenant, rule_name = %rule.name))]
pub async fn create_rule(
    State(state): State<AppState>,
    Extension(tenant): Extension<CustomerId>,
    ValidRule(rule): ValidRule,
) -> Result<impl IntoResponse, ApiError> {
    let rule_id = state.rules.insert(&tenant, &rule).await?;
    info!(rule_id = %rule_id, "A new rule was added");
    Ok(Json(json!({ "rule_id": rule_id })))
}

#[instrument(skip_all, fields(customer_id = %tenant, rule_name = %rule.name))]
pub async fn edit_rule(
    State(state): State<AppState>,
    Extension(tenant): Extension<CustomerId>,
    ValidRule(rule): ValidRule,
) -> Result<impl IntoResponse, ApiError> {
    state.rules.update(&tenant, &rule).await?;
    info!("The rule was edited");
    Ok(Json(json!({ "success": true })))
}

#[instrument(skip_all, fields(customer_id = %tenant, rule_name = %rule_name))]
pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(tenant): Extension<CustomerId>,
    Path(rule_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    crate::rules::validate_rule_name(&rule_name)?;
    state.rules.delete(&tenant, &rule_name).await?;
    info!("The rule was deleted");
    Ok(Json(json!({ "success": true })))
}

/// Apply a batch of operations through the remote rule service.
///
/// Always answers 207, whatever the individual outcomes.
#[instrument(skip_all, fields(customer_id = %tenant, operations = request.len()))]
pub async fn bulk_operations(
    State(state): State<AppState>,
    Extension(tenant): Extension<CustomerId>,
    ApiJson(request): ApiJson<BulkRequest>,
) -> impl IntoResponse {
    info!("Got a request to perform bulk operations");
    let response = state.bulk.execute(&request, &tenant).await;
    (StatusCode::MULTI_STATUS, Json(response))
}
