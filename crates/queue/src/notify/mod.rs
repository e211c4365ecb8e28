//! Pub/sub notifications
//!
//! This module provides:
//! - [`Notifier`] - fire-and-forget publish/subscribe abstraction
//! - [`PgNotifier`] - PostgreSQL LISTEN/NOTIFY transport
//! - [`InMemoryNotifier`] - in-process transport for testing
//!
//! Two kinds of channels are used: the global [`WORK_PENDING_CHANNEL`] that
//! wakes schedulers, and one [`status_channel`] per task type carrying
//! [`StatusNotification`](crate::task::StatusNotification)s.

mod memory;
mod notifier;
mod postgres;
mod router;

pub use memory::InMemoryNotifier;
pub use notifier::{
    notification_handler, status_channel, Notification, NotificationHandler, Notifier,
    NotifyError, STATUS_CHANNEL_PREFIX, WORK_PENDING_CHANNEL,
};
pub use postgres::PgNotifier;

pub(crate) use notifier::publish_status;
