//! Notifier trait definition

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::task::StatusNotification;

/// Channel every dispatch publishes on to wake schedulers
pub const WORK_PENDING_CHANNEL: &str = "pgqueue_work_pending";

/// Prefix of the per-task-type status channels
pub const STATUS_CHANNEL_PREFIX: &str = "pgqueue_status.";

/// Status channel for a task type
///
/// PostgreSQL caps channel names at 63 bytes, which bounds usable task ids
/// to 48 bytes when notifications go over LISTEN/NOTIFY.
pub fn status_channel(task_id: &str) -> String {
    format!("{STATUS_CHANNEL_PREFIX}{task_id}")
}

/// Error type for notifier operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    /// Underlying pub/sub transport failed
    #[error("notification transport error: {0}")]
    Transport(String),

    /// Payload could not be encoded
    #[error("notification serialization error: {0}")]
    Serialization(String),

    /// The notifier was shut down
    #[error("notifier is shut down")]
    Closed,
}

/// A message received on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Notification handler function type
pub type NotificationHandler = Arc<
    dyn Fn(Notification) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

/// Wrap an async closure as a [`NotificationHandler`]
pub fn notification_handler<F, Fut>(handler: F) -> NotificationHandler
where
    F: Fn(Notification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |notification| Box::pin(handler(notification)))
}

/// Fire-and-forget pub/sub
///
/// No delivery guarantee: a publish with no subscriber connected is lost.
/// Handlers on one channel see messages in publish order. The store stays
/// the source of truth; notifications only shorten pickup latency.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Publish a JSON payload on a channel
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), NotifyError>;

    /// Add a handler for a channel (a channel may have several)
    async fn subscribe(
        &self,
        channel: &str,
        handler: NotificationHandler,
    ) -> Result<(), NotifyError>;

    /// Remove every handler of a channel
    async fn unsubscribe(&self, channel: &str) -> Result<(), NotifyError>;

    /// Remove every handler of every channel
    async fn unsubscribe_all(&self) -> Result<(), NotifyError>;

    /// Stop delivering and release the transport
    async fn shutdown(&self) -> Result<(), NotifyError>;
}

/// Publish a status change, logging instead of failing
pub(crate) async fn publish_status(notifier: &dyn Notifier, notification: &StatusNotification) {
    let payload = match serde_json::to_value(notification) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(id = notification.id, "Failed to encode status notification: {}", e);
            return;
        }
    };

    if let Err(e) = notifier
        .publish(&status_channel(&notification.task_id), payload)
        .await
    {
        warn!(
            task_id = %notification.task_id,
            id = notification.id,
            status = %notification.status,
            "Failed to publish status notification: {}",
            e
        );
    }
}
