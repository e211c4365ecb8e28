//! Claim engine and handler registry
//!
//! The [`ClaimEngine`] turns pending rows into claimed batches; the
//! [`HandlerRegistry`] tells it which task types exist and how many rows of
//! each to take at once.

mod claim;
mod registry;

pub use claim::{ClaimEngine, ClaimOutcome};
pub use registry::{
    HandlerRegistry, TaskHandler, TaskRegistration, TaskResult, DEFAULT_BATCH_SIZE,
};
