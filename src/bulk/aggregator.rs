//! Concurrent execution of a bulk request and aggregation of its outcomes.

use futures::future::join_all;
use tracing::{error, info};

use super::dispatcher::RuleOperationDispatcher;
use super::remote::RemoteError;
use crate::rules::{BulkRequest, BulkResponse, CustomerId, OperationOutcome, RuleOperation};

/// Runs every operation of a bulk request concurrently and reassembles the
/// outcomes in request order.
///
/// The batch itself never fails: transport and status errors become
/// per-operation failures.
#[derive(Clone)]
pub struct BulkResultAggregator {
    dispatcher: RuleOperationDispatcher,
}

impl BulkResultAggregator {
    pub fn new(dispatcher: RuleOperationDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Execute all operations and return one outcome per operation, in input order.
    pub async fn run(&self, request: &BulkRequest, tenant: &CustomerId) -> Vec<OperationOutcome> {
        let calls = request
            .operations
            .iter()
            .map(|operation| self.dispatcher.dispatch(operation, tenant));

        // join_all yields results positionally, independent of completion order.
        let results = join_all(calls).await;

        request
            .operations
            .iter()
            .zip(results)
            .map(|(operation, result)| classify(operation, result))
            .collect()
    }

    /// Execute all operations and partition the outcomes.
    pub async fn execute(&self, request: &BulkRequest, tenant: &CustomerId) -> BulkResponse {
        let response: BulkResponse = self.run(request, tenant).await.into_iter().collect();

        info!(
            customer_id = %tenant,
            operations = request.len(),
            successful = response.successful.len(),
            failed = response.errors.len(),
            "Bulk operations completed"
        );
        response
    }
}

fn classify(
    operation: &RuleOperation,
    result: Result<serde_json::Value, RemoteError>,
) -> OperationOutcome {
    match result {
        Ok(payload) => OperationOutcome::success(operation, payload),
        Err(err) => {
            error!(
                operation = %operation.operation,
                customer_id = %operation.customer_id,
                error = %err,
                "Bulk operation failed"
            );
            OperationOutcome::failure(operation, err.to_string())
        }
    }
}
