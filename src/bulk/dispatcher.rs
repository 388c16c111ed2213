//! Translation of one rule operation into one remote call.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::remote::{HttpMethod, RemoteError, RemoteRequest, RemoteRuleService};
use crate::rules::{CustomerId, OperationKind, RuleOperation, ValidationError};

const RULES_PATH: &str = "customers/rules";

/// Executes single rule operations against the remote rule service.
///
/// Every dispatch performs at most one call, bounded by a per-call timeout.
/// A call that times out fails as a transport error.
#[derive(Clone)]
pub struct RuleOperationDispatcher {
    service: Arc<dyn RemoteRuleService>,
    timeout: Duration,
}

impl RuleOperationDispatcher {
    pub fn new(service: Arc<dyn RemoteRuleService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Build the remote call for an operation issued on behalf of `tenant`.
    pub fn request_for(
        operation: &RuleOperation,
        tenant: &CustomerId,
    ) -> Result<RemoteRequest, RemoteError> {
        operation.validate()?;

        let (method, path, body) = match operation.operation {
            OperationKind::Create => (
                HttpMethod::Post,
                RULES_PATH.to_string(),
                Some(rule_body(operation)?),
            ),
            OperationKind::Update => (
                HttpMethod::Put,
                RULES_PATH.to_string(),
                Some(rule_body(operation)?),
            ),
            OperationKind::Delete => {
                let name = operation
                    .rule_name
                    .as_deref()
                    .ok_or(ValidationError::MissingRuleName(operation.operation))?;
                (HttpMethod::Delete, format!("{}/{}", RULES_PATH, name), None)
            }
        };

        Ok(RemoteRequest {
            method,
            path,
            customer_id: tenant.to_string(),
            body,
        })
    }

    /// Perform the operation and return the parsed response payload.
    pub async fn dispatch(
        &self,
        operation: &RuleOperation,
        tenant: &CustomerId,
    ) -> Result<serde_json::Value, RemoteError> {
        let request = Self::request_for(operation, tenant)?;
        trace!(method = ?request.method, path = %request.path, "Dispatching rule operation");

        let response = tokio::time::timeout(self.timeout, self.service.send(request))
            .await
            .map_err(|_| {
                RemoteError::Transport(format!("request timed out after {:?}", self.timeout))
            })??;

        if !response.is_success() {
            return Err(RemoteError::Status {
                status: response.status,
                body: response.body,
            });
        }

        debug!(
            operation = %operation.operation,
            status = response.status,
            "Rule operation succeeded"
        );
        Ok(parse_payload(&response.body))
    }
}

fn rule_body(operation: &RuleOperation) -> Result<serde_json::Value, RemoteError> {
    let rule = operation
        .rule_data
        .as_ref()
        .ok_or(ValidationError::MissingRuleData(operation.operation))?;
    serde_json::to_value(rule).map_err(|e| RemoteError::Transport(e.to_string()))
}

/// Responses are expected to be JSON; anything else is kept as text.
fn parse_payload(body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::testing::ScriptedRuleService;
    use crate::rules::{Expiry, RuleData};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn tenant() -> CustomerId {
        CustomerId::parse("tenant-1").unwrap()
    }

    #[test]
    fn test_create_maps_to_post_with_body() {
        let ts = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let rule = RuleData::new("r1", "desc", "10.0.0.1").with_expiry(Expiry::At(ts));
        let request =
            RuleOperationDispatcher::request_for(&RuleOperation::create("7", rule), &tenant())
                .unwrap();

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.path, "customers/rules");
        assert_eq!(request.customer_id, "tenant-1");
        assert_eq!(
            request.body,
            Some(json!({
                "name": "r1",
                "description": "desc",
                "ip": "10.0.0.1",
                "expired_date": "2030-01-01T00:00:00Z"
            }))
        );
    }

    #[test]
    fn test_update_without_expiry_omits_field() {
        let rule = RuleData::new("r1", "desc", "10.0.0.1");
        let request =
            RuleOperationDispatcher::request_for(&RuleOperation::update("7", rule), &tenant())
                .unwrap();

        assert_eq!(request.method, HttpMethod::Put);
        let body = request.body.unwrap();
        assert!(body.get("expired_date").is_none());
    }

    #[test]
    fn test_delete_maps_to_path_without_body() {
        let request =
            RuleOperationDispatcher::request_for(&RuleOperation::delete("7", "r2"), &tenant())
                .unwrap();

        assert_eq!(request.method, HttpMethod::Delete);
        assert_eq!(request.path, "customers/rules/r2");
        assert!(request.body.is_none());
    }

    #[test]
    fn test_invalid_operation_is_rejected() {
        let mut op = RuleOperation::delete("7", "r2");
        op.rule_name = None;
        let result = RuleOperationDispatcher::request_for(&op, &tenant());
        assert!(matches!(result, Err(RemoteError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_dispatch_performs_exactly_one_call() {
        let service = Arc::new(ScriptedRuleService::new());
        let dispatcher = RuleOperationDispatcher::new(service.clone(), Duration::from_secs(1));

        let payload = dispatcher
            .dispatch(&RuleOperation::delete("7", "r2"), &tenant())
            .await
            .unwrap();

        assert_eq!(payload, json!({"success": true}));
        assert_eq!(service.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_non_success_is_remote_error() {
        let service = Arc::new(ScriptedRuleService::new().respond("r2", 404, "not here"));
        let dispatcher = RuleOperationDispatcher::new(service, Duration::from_secs(1));

        let err = dispatcher
            .dispatch(&RuleOperation::delete("7", "r2"), &tenant())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                status: 404,
                body: "not here".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_transport_error_passes_through() {
        let service = Arc::new(ScriptedRuleService::new().fail("r2", "connection refused"));
        let dispatcher = RuleOperationDispatcher::new(service, Duration::from_secs(1));

        let err = dispatcher
            .dispatch(&RuleOperation::delete("7", "r2"), &tenant())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Transport("connection refused".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_timeout_is_transport_error() {
        let service = Arc::new(ScriptedRuleService::new().delay("r2", Duration::from_secs(60)));
        let dispatcher = RuleOperationDispatcher::new(service, Duration::from_secs(10));

        let err = dispatcher
            .dispatch(&RuleOperation::delete("7", "r2"), &tenant())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Transport(msg) if msg.contains("timed out")));
    }

    #[test]
    fn test_parse_payload_fallbacks() {
        assert_eq!(parse_payload(""), serde_json::Value::Null);
        assert_eq!(parse_payload("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_payload("plain"), json!("plain"));
    }
}
