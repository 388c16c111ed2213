//! Bulk rule operations against the remote rule service.
//!
//! A bulk request fans out to one remote call per operation. All calls run
//! concurrently and every call yields an outcome, so a failing or slow
//! operation never fails or blocks its siblings.

mod aggregator;
mod dispatcher;
mod remote;

pub use aggregator::BulkResultAggregator;
pub use dispatcher::RuleOperationDispatcher;
pub use remote::{
    HttpMethod, HttpRuleService, RemoteError, RemoteRequest, RemoteResponse, RemoteRuleService,
    TENANT_HEADER,
};
