//! Task data model
//!
//! This module provides:
//! - [`TaskRecord`] and the [`TaskStatus`] state machine
//! - [`TaskError`], the normalized error detail persisted in `log`
//! - [`Task`], the typed handler trait

mod error;
mod record;
mod typed;

pub use error::TaskError;
pub use record::{StatusNotification, TaskOutcome, TaskRecord, TaskStatus, UnknownStatus};
pub use typed::Task;
