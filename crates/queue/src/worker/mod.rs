//! Scheduling of drain cycles
//!
//! A [`Scheduler`] owns the single-flight flag, the wake sources and the
//! batch execution of one set of registered task types.

mod scheduler;

pub use scheduler::{DrainReport, Scheduler, SchedulerConfig, SchedulerError};
