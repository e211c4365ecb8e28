//! LISTEN/NOTIFY implementation of Notifier
//!
//! Publishing goes through `pg_notify` on the shared pool. Receiving uses a
//! dedicated `PgListener` connection owned by one background task; listen and
//! unlisten requests reach it over a command channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgNotification};
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use super::notifier::*;
use super::router::ChannelRouter;

/// Pause before receiving again after the listener connection failed
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type Reply = oneshot::Sender<Result<(), NotifyError>>;

enum ListenCommand {
    Listen(String, Reply),
    Unlisten(String, Reply),
    UnlistenAll(Reply),
    Shutdown,
}

/// PostgreSQL LISTEN/NOTIFY notifier
///
/// # Example
///
/// ```ignore
/// use pgqueue::notify::PgNotifier;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let notifier = PgNotifier::connect(pool).await?;
/// notifier.publish("pgqueue_work_pending", json!({})).await?;
/// ```
pub struct PgNotifier {
    pool: PgPool,
    router: Arc<ChannelRouter>,
    commands: mpsc::UnboundedSender<ListenCommand>,
    /// Serializes subscription changes so LISTEN state matches the router
    listen_lock: Mutex<()>,
    listener_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl PgNotifier {
    /// Open the listener connection and start routing notifications
    pub async fn connect(pool: PgPool) -> Result<Self, NotifyError> {
        let listener = PgListener::connect_with(&pool).await.map_err(|e| {
            error!("Failed to open listener connection: {}", e);
            NotifyError::Transport(e.to_string())
        })?;

        let router = Arc::new(ChannelRouter::new());
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_listener(listener, commands_rx, Arc::clone(&router)));

        debug!("Listener connection ready");
        Ok(Self {
            pool,
            router,
            commands,
            listen_lock: Mutex::new(()),
            listener_handle: parking_lot::Mutex::new(Some(handle)),
        })
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> ListenCommand,
    ) -> Result<(), NotifyError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| NotifyError::Closed)?;
        response.await.map_err(|_| NotifyError::Closed)?
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    #[instrument(skip(self, payload))]
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&payload)
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, handler))]
    async fn subscribe(
        &self,
        channel: &str,
        handler: NotificationHandler,
    ) -> Result<(), NotifyError> {
        // Later subscribers wait for the first one's LISTEN to settle
        let _guard = self.listen_lock.lock().await;
        if self.router.add(channel, handler) {
            let name = channel.to_string();
            if let Err(e) = self.request(|reply| ListenCommand::Listen(name, reply)).await {
                self.router.remove(channel);
                return Err(e);
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unsubscribe(&self, channel: &str) -> Result<(), NotifyError> {
        let _guard = self.listen_lock.lock().await;
        if self.router.remove(channel) {
            let name = channel.to_string();
            self.request(|reply| ListenCommand::Unlisten(name, reply))
                .await?;
        }
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<(), NotifyError> {
        let _guard = self.listen_lock.lock().await;
        self.router.clear();
        self.request(ListenCommand::UnlistenAll).await
    }

    async fn shutdown(&self) -> Result<(), NotifyError> {
        self.router.clear();
        let _ = self.commands.send(ListenCommand::Shutdown);

        let handle = self.listener_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Listener task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

async fn run_listener(
    mut listener: PgListener,
    mut commands: mpsc::UnboundedReceiver<ListenCommand>,
    router: Arc<ChannelRouter>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ListenCommand::Listen(channel, reply)) => {
                    let result = listener.listen(&channel).await.map_err(transport_error);
                    let _ = reply.send(result);
                }
                Some(ListenCommand::Unlisten(channel, reply)) => {
                    let result = listener.unlisten(&channel).await.map_err(transport_error);
                    let _ = reply.send(result);
                }
                Some(ListenCommand::UnlistenAll(reply)) => {
                    let result = listener.unlisten_all().await.map_err(transport_error);
                    let _ = reply.send(result);
                }
                Some(ListenCommand::Shutdown) | None => break,
            },
            received = listener.recv() => match received {
                Ok(notification) => {
                    router.route(decode_notification(&notification));
                }
                Err(e) => {
                    // The listener reconnects and re-listens on the next recv;
                    // anything published meanwhile is lost.
                    warn!("Listener connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
        }
    }

    debug!("Listener task exited");
}

fn transport_error(e: sqlx::Error) -> NotifyError {
    NotifyError::Transport(e.to_string())
}

fn decode_notification(notification: &PgNotification) -> Notification {
    Notification {
        channel: notification.channel().to_string(),
        payload: decode_payload(notification.payload()),
    }
}

/// Payloads from other producers may not be JSON; keep them as strings
fn decode_payload(raw: &str) -> serde_json::Value {
    if raw.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload(""), serde_json::Value::Null);
        assert_eq!(
            decode_payload(r#"{"task_id":"t","status":"pending","id":1}"#),
            serde_json::json!({"task_id": "t", "status": "pending", "id": 1})
        );
        assert_eq!(decode_payload("plain text"), serde_json::json!("plain text"));
    }
}
