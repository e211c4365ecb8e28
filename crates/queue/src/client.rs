//! Queue client: dispatch, subscription and status notifications

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, instrument, warn};

use crate::config::{ConfigError, QueueConfig};
use crate::engine::{HandlerRegistry, TaskRegistration};
use crate::notify::{
    notification_handler, publish_status, status_channel, InMemoryNotifier, Notifier,
    NotifyError, PgNotifier, WORK_PENDING_CHANNEL,
};
use crate::persistence::{InMemoryTaskStore, PostgresTaskStore, StoreError, TaskStore};
use crate::retention::RetentionSweep;
use crate::task::{StatusNotification, TaskRecord, TaskStatus};
use crate::worker::{Scheduler, SchedulerConfig, SchedulerError};

/// Errors surfaced by [`QueueClient`]
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notifier error: {0}")]
    Notify(#[from] NotifyError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Rows were still outstanding when the wait timed out
    #[error("timed out waiting for {} task(s) to finish", ids.len())]
    WaitTimeout { ids: Vec<i64> },

    /// Dispatched rows disappeared before they could be read back
    #[error("task rows not found: {ids:?}")]
    NotFound { ids: Vec<i64> },
}

/// Payloads for one dispatch
///
/// A single value is one task; a vector is a batch inserted together.
#[derive(Debug, Clone, PartialEq)]
pub enum Payloads {
    One(Value),
    Many(Vec<Value>),
}

impl Payloads {
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

impl From<Value> for Payloads {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<Vec<Value>> for Payloads {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

/// Records returned by a blocking dispatch, shaped like its input
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    One(TaskRecord),
    Many(Vec<TaskRecord>),
}

impl Dispatched {
    pub fn into_vec(self) -> Vec<TaskRecord> {
        match self {
            Self::One(record) => vec![record],
            Self::Many(records) => records,
        }
    }
}

/// How a blocking dispatch waits for its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitOptions {
    /// Interval between outstanding-row checks
    #[serde(with = "crate::config::duration_millis")]
    pub poll_interval: Duration,

    /// Give up after this long; `None` waits forever
    #[serde(default, with = "crate::config::option_duration_millis")]
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: None,
        }
    }
}

impl WaitOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&QueueConfig> for WaitOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            poll_interval: config.wait_poll_interval,
            timeout: config.wait_timeout,
        }
    }
}

/// Entry point of the queue
///
/// # Example
///
/// ```ignore
/// use pgqueue::{QueueClient, QueueConfig, TaskRegistration, WaitOptions};
///
/// let client = QueueClient::connect(QueueConfig::from_env()?).await?;
///
/// client
///     .subscribe(
///         [TaskRegistration::new("resize", |payload| async move {
///             Ok(json!({ "resized": payload["path"] }))
///         })
///         .with_batch_size(4)],
///         None,
///     )
///     .await?;
///
/// let ids = client.dispatch("resize", json!({ "path": "a.png" })).await?;
/// let done = client
///     .dispatch_and_wait("resize", json!({ "path": "b.png" }), WaitOptions::default())
///     .await?;
///
/// client.shutdown().await?;
/// ```
pub struct QueueClient {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    config: QueueConfig,
    retention: Option<RetentionSweep>,
    schedulers: parking_lot::Mutex<Vec<Scheduler>>,
}

impl QueueClient {
    /// Connect to PostgreSQL using `config`
    ///
    /// Opens a pool of `pool_max` connections plus one listener connection,
    /// creates the task table if missing and applies retention once.
    #[instrument(skip(config))]
    pub async fn connect(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let url = config.require_database_url()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let store = PostgresTaskStore::new(pool.clone());
        let notifier = PgNotifier::connect(pool).await?;

        info!(pool_max = config.pool_max, "Connected to PostgreSQL");
        Self::new(Arc::new(store), Arc::new(notifier), config).await
    }

    /// Build a client on in-memory backends
    pub async fn in_memory(config: QueueConfig) -> Result<Self, QueueError> {
        Self::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryNotifier::new()),
            config,
        )
        .await
    }

    /// Build a client on any store and notifier
    pub async fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        store.ensure_schema().await?;

        let retention = match &config.tasks_ttl {
            Some(ttl) => Some(RetentionSweep::from_ttl(Arc::clone(&store), ttl)?),
            None => None,
        };

        let client = Self {
            store,
            notifier,
            config,
            retention,
            schedulers: parking_lot::Mutex::new(Vec::new()),
        };
        client.sweep().await?;
        Ok(client)
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Wait options taken from the client configuration
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::from(&self.config)
    }

    /// Insert tasks and wake schedulers; returns row ids in payload order
    ///
    /// Notification failures are logged, never returned: the rows are
    /// committed and the schedulers' timers will find them.
    #[instrument(skip(self, payloads))]
    pub async fn dispatch(
        &self,
        task_id: &str,
        payloads: impl Into<Payloads>,
    ) -> Result<Vec<i64>, QueueError> {
        let ids = self
            .store
            .insert_batch(task_id, payloads.into().into_vec())
            .await?;
        if ids.is_empty() {
            return Ok(ids);
        }

        for &id in &ids {
            publish_status(
                self.notifier.as_ref(),
                &StatusNotification::new(task_id, TaskStatus::Pending, id),
            )
            .await;
        }

        if let Err(e) = self
            .notifier
            .publish(WORK_PENDING_CHANNEL, json!({ "task_id": task_id }))
            .await
        {
            warn!(task_id = %task_id, "Failed to publish work-pending wake: {}", e);
        }

        debug!(task_id = %task_id, count = ids.len(), "Dispatched tasks");
        Ok(ids)
    }

    /// Dispatch, then block until every row is `completed` or `error`
    ///
    /// Returns `Dispatched::One` for a single payload and `Dispatched::Many`
    /// for a vector, in dispatch order.
    pub async fn dispatch_and_wait(
        &self,
        task_id: &str,
        payloads: impl Into<Payloads>,
        options: WaitOptions,
    ) -> Result<Dispatched, QueueError> {
        let payloads = payloads.into();
        let single = matches!(payloads, Payloads::One(_));

        let ids = self.dispatch(task_id, payloads).await?;
        let records = self.wait_for(task_id, &ids, options).await?;

        if single {
            records
                .into_iter()
                .next()
                .map(Dispatched::One)
                .ok_or(QueueError::NotFound { ids })
        } else {
            Ok(Dispatched::Many(records))
        }
    }

    /// Poll until none of `ids` is outstanding, then read them back by id
    #[instrument(skip(self, ids, options), fields(count = ids.len()))]
    pub async fn wait_for(
        &self,
        task_id: &str,
        ids: &[i64],
        options: WaitOptions,
    ) -> Result<Vec<TaskRecord>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let deadline = options.timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let outstanding = self.store.count_outstanding(task_id, Some(ids)).await?;
            if outstanding == 0 {
                break;
            }

            let mut pause = options.poll_interval;
            if let Some(deadline) = deadline {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    return Err(QueueError::WaitTimeout { ids: ids.to_vec() });
                }
                pause = pause.min(deadline - now);
            }

            debug!(outstanding, "Waiting for tasks");
            tokio::time::sleep(pause).await;
        }

        let records = self.store.find_by_ids(ids).await?;
        if records.len() < ids.len() {
            let found: Vec<i64> = records.iter().map(|r| r.id).collect();
            let missing = ids.iter().copied().filter(|id| !found.contains(id)).collect();
            return Err(QueueError::NotFound { ids: missing });
        }
        Ok(records)
    }

    /// Register handlers and start a scheduler for them
    ///
    /// `poll_interval` overrides the configured timer interval.
    pub async fn subscribe(
        &self,
        registrations: impl IntoIterator<Item = TaskRegistration>,
        poll_interval: Option<Duration>,
    ) -> Result<Scheduler, QueueError> {
        let config = SchedulerConfig::default()
            .with_poll_interval(poll_interval.unwrap_or(self.config.poll_interval))
            .with_shutdown_timeout(self.config.shutdown_timeout);

        let scheduler = Scheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            HandlerRegistry::new(registrations),
            config,
            self.retention.clone(),
        );
        scheduler.start().await?;

        self.schedulers.lock().push(scheduler.clone());
        Ok(scheduler)
    }

    /// Call `handler` for status changes of `task_id`
    ///
    /// With `status` set, only that status is delivered.
    pub async fn subscribe_to_status<F, Fut>(
        &self,
        task_id: &str,
        status: Option<TaskStatus>,
        handler: F,
    ) -> Result<(), QueueError>
    where
        F: Fn(StatusNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let channel = status_channel(task_id);

        self.notifier
            .subscribe(
                &channel,
                notification_handler(move |notification| {
                    let handler = Arc::clone(&handler);
                    async move {
                        let update: StatusNotification =
                            match serde_json::from_value(notification.payload) {
                                Ok(update) => update,
                                Err(e) => {
                                    warn!(
                                        channel = %notification.channel,
                                        "Ignoring malformed status notification: {}",
                                        e
                                    );
                                    return;
                                }
                            };

                        if status.map_or(true, |wanted| wanted == update.status) {
                            handler(update).await;
                        }
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Stop status notifications for `task_id`
    pub async fn unsubscribe(&self, task_id: &str) -> Result<(), QueueError> {
        self.notifier.unsubscribe(&status_channel(task_id)).await?;
        Ok(())
    }

    /// Run the retention sweep now; returns deleted rows (0 when disabled)
    pub async fn sweep(&self) -> Result<u64, QueueError> {
        match &self.retention {
            Some(retention) => Ok(retention.sweep().await?),
            None => Ok(0),
        }
    }

    /// Stop every scheduler started by this client and release the notifier
    ///
    /// Returns the first error; the remaining schedulers are still stopped.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let schedulers: Vec<Scheduler> = std::mem::take(&mut *self.schedulers.lock());
        let mut first_error: Option<QueueError> = None;

        for scheduler in schedulers {
            if let Err(e) = scheduler.shutdown().await {
                warn!(scheduler_id = %scheduler.id(), "Scheduler shutdown failed: {}", e);
                first_error.get_or_insert(e.into());
            }
        }

        if let Err(e) = self.notifier.unsubscribe_all().await {
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.notifier.shutdown().await {
            first_error.get_or_insert(e.into());
        }

        info!("Queue client stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("config", &self.config)
            .field("schedulers", &self.schedulers.lock().len())
            .finish_non_exhaustive()
    }
}
