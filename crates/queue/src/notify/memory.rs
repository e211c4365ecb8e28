//! In-process notifier for testing

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::notifier::*;
use super::router::ChannelRouter;

/// In-memory implementation of Notifier
///
/// Delivers to handlers registered on the same instance. Share one
/// instance (behind an `Arc`) between clients to simulate a broker.
pub struct InMemoryNotifier {
    router: ChannelRouter,
    closed: AtomicBool,
}

impl InMemoryNotifier {
    /// Create a new in-memory notifier
    pub fn new() -> Self {
        Self {
            router: ChannelRouter::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether a channel currently has handlers
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.router.is_subscribed(channel)
    }

    fn ensure_open(&self) -> Result<(), NotifyError> {
        if self.closed.load(Ordering::Acquire) {
            Err(NotifyError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), NotifyError> {
        self.ensure_open()?;
        self.router.route(Notification {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: NotificationHandler,
    ) -> Result<(), NotifyError> {
        self.ensure_open()?;
        self.router.add(channel, handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), NotifyError> {
        self.router.remove(channel);
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), NotifyError> {
        self.router.clear();
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), NotifyError> {
        self.closed.store(true, Ordering::Release);
        self.router.clear();
        Ok(())
    }
}
