//! Persistence layer for the task queue
//!
//! This module provides:
//! - [`TaskStore`] trait for task record persistence and claiming
//! - [`PostgresTaskStore`] for production
//! - [`InMemoryTaskStore`] for testing

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryTaskStore;
pub use postgres::{PostgresTaskStore, SCHEMA_SQL};
pub use store::{ClaimError, StoreError, TaskStore};
