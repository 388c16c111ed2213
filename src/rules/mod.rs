//! Rule records, bulk operation types and the rule store.
//!
//! Every rule belongs to exactly one tenant. Rule names are unique within a
//! tenant's namespace, never globally.

mod model;
mod redis_store;
mod store;

pub use model::{
    BulkRequest, BulkResponse, CustomerId, Expiry, OperationFailure, OperationKind,
    OperationOutcome, OperationSuccess, RuleData, RuleOperation, ValidationError,
};
pub(crate) use model::validate_rule_name;
pub use redis_store::RedisRuleStore;
pub use store::{
    AuditEntry, InMemoryRuleStore, RuleRecord, RuleStore, StoreError, DEFAULT_AUDIT_CAPACITY,
};
