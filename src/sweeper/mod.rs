//! Background purge of expired rules.
//!
//! The sweeper runs for the lifetime of the process: sweep, sleep for a fixed
//! interval, repeat. Sweeps never overlap because the loop is sequential.
//! Running several instances against one store is safe only because deleting
//! already-deleted rules is a no-op.

mod task;

pub use task::{ExpiredRuleSweeper, SweeperHandle};
