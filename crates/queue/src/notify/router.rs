//! Local fan-out of notifications to subscribed handlers

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::notifier::{Notification, NotificationHandler};

/// Routes notifications to per-subscription queues
///
/// Each subscription owns an unbounded queue drained by its own task, so a
/// handler sees its channel's messages in order and a slow handler never
/// blocks publishers or other subscriptions. Dropping the sender ends the
/// task once already queued messages are handled.
pub(crate) struct ChannelRouter {
    channels: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>>,
}

impl ChannelRouter {
    pub(crate) fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Add a handler; returns true if it is the channel's first
    pub(crate) fn add(&self, channel: &str, handler: NotificationHandler) -> bool {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let name = channel.to_string();

        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if AssertUnwindSafe(handler(notification))
                    .catch_unwind()
                    .await
                    .is_err()
                {
                    warn!(channel = %name, "Notification handler panicked");
                }
            }
            trace!(channel = %name, "Subscription closed");
        });

        let mut channels = self.channels.write();
        let senders = channels.entry(channel.to_string()).or_default();
        let first = senders.is_empty();
        senders.push(tx);
        first
    }

    /// Drop every handler of a channel; returns true if there were any
    pub(crate) fn remove(&self, channel: &str) -> bool {
        self.channels
            .write()
            .remove(channel)
            .is_some_and(|senders| !senders.is_empty())
    }

    /// Drop every handler; returns the channels that had handlers
    pub(crate) fn clear(&self) -> Vec<String> {
        self.channels
            .write()
            .drain()
            .filter(|(_, senders)| !senders.is_empty())
            .map(|(channel, _)| channel)
            .collect()
    }

    /// Queue a notification for every handler of its channel
    ///
    /// Returns the number of handlers it was queued for.
    pub(crate) fn route(&self, notification: Notification) -> usize {
        let channels = self.channels.read();
        let Some(senders) = channels.get(&notification.channel) else {
            return 0;
        };

        senders
            .iter()
            .filter(|tx| tx.send(notification.clone()).is_ok())
            .count()
    }

    pub(crate) fn is_subscribed(&self, channel: &str) -> bool {
        self.channels
            .read()
            .get(channel)
            .is_some_and(|senders| !senders.is_empty())
    }
}
