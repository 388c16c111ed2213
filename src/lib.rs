//! Rulekeeper - Multi-tenant Rule Management Service
//!
//! This crate manages per-tenant rule records. Besides single-rule CRUD it
//! applies bulk batches of operations concurrently against a remote rule
//! service, limits each tenant to a fixed number of mutating requests per
//! window using a shared counter store, and purges expired rules in the
//! background. Rules, the audit trail and counters live in Redis when one is
//! configured, and in process memory otherwise.

pub mod bulk;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod rules;
pub mod storage;
pub mod sweeper;
