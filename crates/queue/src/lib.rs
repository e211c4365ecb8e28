//! # pgqueue
//!
//! A durable, ordered work queue on PostgreSQL.
//!
//! ## Features
//!
//! - **FIFO per task type**: rows are claimed in insertion order with `FOR UPDATE SKIP LOCKED`
//! - **Batched claims**: each task type sets how many rows a drain cycle takes at once
//! - **Single-flight scheduling**: one drain cycle per scheduler, woken by timer and LISTEN/NOTIFY
//! - **Blocking dispatch**: wait for rows to reach `completed` or `error`
//! - **Status notifications**: per task type pub/sub of every status change
//! - **Retention**: rows older than a TTL are swept after each drain cycle
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        QueueClient                           │
//! │  (dispatch, dispatch_and_wait, subscribe, status channels)  │
//! └─────────────────────────────────────────────────────────────┘
//!            │ insert_batch                    │ subscribe
//!            ▼                                 ▼
//! ┌──────────────────────┐        ┌─────────────────────────────┐
//! │      TaskStore       │◄───────│          Scheduler          │
//! │  (pgqueue_tasks)     │ claim  │  (single-flight drain loop) │
//! └──────────────────────┘        └─────────────────────────────┘
//!            ▲                                 ▲
//!            └────────── Notifier ─────────────┘
//!               (work-pending + status channels)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pgqueue::prelude::*;
//!
//! let client = QueueClient::connect(QueueConfig::from_env()?).await?;
//!
//! client
//!     .subscribe([TaskRegistration::new("send_email", |payload| async move {
//!         Ok(json!({ "sent_to": payload["to"] }))
//!     })], None)
//!     .await?;
//!
//! let record = client
//!     .dispatch_and_wait("send_email", json!({ "to": "a@example.com" }), client.wait_options())
//!     .await?;
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod notify;
pub mod persistence;
pub mod retention;
pub mod task;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::client::{Dispatched, Payloads, QueueClient, QueueError, WaitOptions};
    pub use crate::config::{ConfigError, QueueConfig};
    pub use crate::engine::{TaskRegistration, TaskResult};
    pub use crate::task::{StatusNotification, Task, TaskError, TaskRecord, TaskStatus};
    pub use crate::worker::{DrainReport, Scheduler};
}

// Re-export key types at crate root
pub use client::{Dispatched, Payloads, QueueClient, QueueError, WaitOptions};
pub use config::{ConfigError, QueueConfig};
pub use engine::{
    ClaimEngine, ClaimOutcome, HandlerRegistry, TaskHandler, TaskRegistration, TaskResult,
};
pub use notify::{InMemoryNotifier, Notifier, NotifyError, PgNotifier};
pub use persistence::{ClaimError, InMemoryTaskStore, PostgresTaskStore, StoreError, TaskStore};
pub use retention::{parse_ttl, RetentionSweep};
pub use task::{StatusNotification, Task, TaskError, TaskOutcome, TaskRecord, TaskStatus};
pub use worker::{DrainReport, Scheduler, SchedulerConfig, SchedulerError};
