//! Scheduler: single-flight drain cycles driven by timer and notifier wakes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::duration_millis;
use crate::engine::{ClaimEngine, ClaimOutcome, HandlerRegistry};
use crate::notify::{notification_handler, publish_status, Notifier, NotifyError, WORK_PENDING_CHANNEL};
use crate::persistence::TaskStore;
use crate::retention::RetentionSweep;
use crate::task::{StatusNotification, TaskError, TaskOutcome, TaskRecord, TaskStatus};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timer wake interval
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// How long `shutdown` waits for an in-flight drain
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    /// Set the timer wake interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Subscribing to the work-pending channel failed
    #[error("notifier error: {0}")]
    Notify(#[from] NotifyError),

    /// Scheduler was already started
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// An in-flight drain did not finish in time
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Summary of one drain cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Size of each claimed batch, in claim order
    pub batches: Vec<usize>,

    /// Rows moved to `completed`
    pub completed: usize,

    /// Rows moved to `error` by their handler
    pub failed: usize,

    /// Claims that failed and were retried
    pub claim_retries: usize,

    /// Rows deleted by the retention sweep at the end of the cycle
    pub swept: u64,
}

impl DrainReport {
    /// Rows whose handler ran in this cycle
    pub fn processed(&self) -> usize {
        self.batches.iter().sum()
    }
}

/// Drives the claim engine for one set of registered task types
///
/// Wakes come from a timer, from the notifier's work-pending channel and
/// once at start. Only one drain cycle runs per scheduler at a time; a wake
/// that arrives mid-drain is folded into the running cycle, which keeps
/// claiming until nothing is left. Several schedulers (in one process or many) may
/// share a store: row locking keeps their batches disjoint.
///
/// # Example
///
/// ```ignore
/// use pgqueue::{Scheduler, SchedulerConfig, TaskRegistration, HandlerRegistry};
///
/// let registry = HandlerRegistry::new([
///     TaskRegistration::new("send_email", |payload| async move {
///         Ok(json!({ "sent": payload["to"] }))
///     }),
/// ]);
///
/// let scheduler = Scheduler::new(store, notifier, registry, SchedulerConfig::default(), None);
/// scheduler.start().await?;
///
/// // ... later, graceful shutdown
/// scheduler.shutdown().await?;
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    id: String,
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
    engine: ClaimEngine,
    registry: HandlerRegistry,
    retention: Option<RetentionSweep>,
    draining: AtomicBool,
    wake_requested: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    ticker_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Clears the draining flag when a drain cycle ends, even by panic
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Scheduler {
    /// Create a scheduler; nothing runs until [`start`](Self::start) or [`wake`](Self::wake)
    pub fn new(
        store: Arc<dyn TaskStore>,
        notifier: Arc<dyn Notifier>,
        registry: HandlerRegistry,
        config: SchedulerConfig,
        retention: Option<RetentionSweep>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let engine = ClaimEngine::new(Arc::clone(&store), Arc::clone(&notifier));

        Self {
            inner: Arc::new(SchedulerInner {
                id: format!("scheduler-{}", Uuid::now_v7()),
                config,
                store,
                notifier,
                engine,
                registry,
                retention,
                draining: AtomicBool::new(false),
                wake_requested: AtomicBool::new(false),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                shutdown_tx,
                ticker_handle: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Unique scheduler id (for logs)
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Task types this scheduler claims
    pub fn task_ids(&self) -> &[String] {
        self.inner.registry.task_ids()
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.config.poll_interval
    }

    /// Whether a drain cycle is running
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Whether the scheduler was started and not shut down
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Start wake sources: work-pending subscription, timer, one immediate wake
    #[instrument(skip(self), fields(scheduler_id = %self.inner.id))]
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            scheduler_id = %self.inner.id,
            task_ids = ?self.inner.registry.task_ids(),
            poll_interval_ms = self.inner.config.poll_interval.as_millis() as u64,
            "Starting scheduler"
        );

        // Weak: the subscription must not keep the scheduler alive
        let weak = Arc::downgrade(&self.inner);
        let subscribed = self
            .inner
            .notifier
            .subscribe(
                WORK_PENDING_CHANNEL,
                notification_handler(move |_| {
                    spawn_wake(&weak);
                    async {}
                }),
            )
            .await;

        if let Err(e) = subscribed {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        self.start_ticker();
        spawn_wake(&Arc::downgrade(&self.inner));

        Ok(())
    }

    /// Run one drain cycle unless one is already running
    ///
    /// Returns `None` when the wake was coalesced into a running cycle or the
    /// scheduler is shut down. A coalesced wake makes the running cycle probe
    /// once more before it ends.
    pub async fn wake(&self) -> Option<DrainReport> {
        self.inner.wake().await
    }

    /// Stop accepting wakes and wait for the in-flight drain
    ///
    /// A running cycle finishes naturally: it keeps claiming until nothing
    /// is pending, then runs the retention sweep. Running handlers are not
    /// cancelled. The work-pending subscription is
    /// left in place as a no-op; `QueueClient::shutdown` removes it.
    #[instrument(skip(self), fields(scheduler_id = %self.inner.id))]
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(scheduler_id = %self.inner.id, "Initiating graceful shutdown");
        self.inner.shutdown_tx.send_replace(true);

        let ticker = self.inner.ticker_handle.lock().take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                warn!("Ticker task ended abnormally: {}", e);
            }
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_timeout;
        while self.inner.draining.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                warn!(scheduler_id = %self.inner.id, "Shutdown timeout reached");
                return Err(SchedulerError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        info!(scheduler_id = %self.inner.id, "Scheduler stopped");
        Ok(())
    }

    fn start_ticker(&self) {
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.poll_interval;
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if weak.strong_count() == 0 {
                            break;
                        }
                        spawn_wake(&weak);
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Ticker: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Ticker exited");
        });

        *self.inner.ticker_handle.lock() = Some(handle);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.inner.id)
            .field("registry", &self.inner.registry)
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}

fn spawn_wake(weak: &Weak<SchedulerInner>) {
    if let Some(inner) = weak.upgrade() {
        tokio::spawn(async move {
            inner.wake().await;
        });
    }
}

impl SchedulerInner {
    async fn wake(&self) -> Option<DrainReport> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.wake_requested.store(true, Ordering::SeqCst);
            debug!(scheduler_id = %self.id, "Drain in progress, wake coalesced");
            return None;
        }
        let _guard = DrainGuard(&self.draining);

        // Shutdown may have started between the two checks
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        self.wake_requested.store(false, Ordering::SeqCst);
        Some(self.drain().await)
    }

    #[instrument(skip(self), fields(scheduler_id = %self.id))]
    async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            match self.engine.claim_one_batch(&self.registry).await {
                Ok(ClaimOutcome::Batch(records)) => {
                    report.batches.push(records.len());
                    self.run_batch(records, &mut report).await;
                }
                Ok(ClaimOutcome::Retry) => {
                    report.claim_retries += 1;
                }
                Ok(ClaimOutcome::Empty) => {
                    // Work may have landed after the last probe; a wake lost
                    // after this check is left to the timer.
                    if self.wake_requested.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    error!("Claim probe failed, ending drain cycle: {}", e);
                    return report;
                }
            }
        }

        if let Some(retention) = &self.retention {
            match retention.sweep().await {
                Ok(deleted) => report.swept = deleted,
                Err(e) => error!("Retention sweep failed: {}", e),
            }
        }

        if report.processed() > 0 {
            debug!(
                batches = report.batches.len(),
                completed = report.completed,
                failed = report.failed,
                "Drain cycle finished"
            );
        }
        report
    }

    /// Run a batch concurrently and wait for every row
    async fn run_batch(&self, records: Vec<TaskRecord>, report: &mut DrainReport) {
        let statuses = join_all(records.into_iter().map(|record| self.execute(record))).await;

        for status in statuses {
            match status {
                Some(TaskStatus::Completed) => report.completed += 1,
                Some(TaskStatus::Error) => report.failed += 1,
                _ => {}
            }
        }
    }

    /// Run one row's handler on its own task, persist and publish the outcome
    ///
    /// Returns the status written, or `None` when the row could not be updated.
    async fn execute(&self, record: TaskRecord) -> Option<TaskStatus> {
        let outcome = match self.registry.handler(&record.task_id) {
            Some(handler) => {
                let execution = tokio::spawn(handler(record.payload));
                match execution.await {
                    Ok(result) => TaskOutcome::from(result),
                    Err(e) if e.is_panic() => {
                        let message = panic_message(e.into_panic());
                        warn!(id = record.id, task_id = %record.task_id, "Task handler panicked: {}", message);
                        TaskOutcome::Failed(TaskError::new(TaskError::PANIC, message))
                    }
                    Err(e) => TaskOutcome::Failed(TaskError::handler(e.to_string())),
                }
            }
            None => TaskOutcome::Failed(TaskError::new(
                TaskError::UNREGISTERED,
                format!("no handler registered for task type {}", record.task_id),
            )),
        };

        let status = outcome.status();
        match self.store.update_status(record.id, outcome).await {
            Ok(true) => {
                debug!(id = record.id, task_id = %record.task_id, %status, "Task finished");
                publish_status(
                    self.notifier.as_ref(),
                    &StatusNotification::new(&record.task_id, status, record.id),
                )
                .await;
                Some(status)
            }
            Ok(false) => {
                warn!(id = record.id, "Task row already terminal or gone, outcome dropped");
                None
            }
            Err(e) => {
                // The row stays `processing`; nothing reclaims it
                error!(id = record.id, "Failed to persist task outcome: {}", e);
                None
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "task handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskRegistration;
    use crate::notify::{status_channel, InMemoryNotifier};
    use crate::persistence::InMemoryTaskStore;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use tokio::sync::oneshot;

    fn scheduler(
        store: &Arc<InMemoryTaskStore>,
        notifier: &Arc<InMemoryNotifier>,
        registrations: Vec<TaskRegistration>,
    ) -> Scheduler {
        Scheduler::new(
            store.clone(),
            notifier.clone(),
            HandlerRegistry::new(registrations),
            SchedulerConfig::default(),
            None,
        )
    }

    fn recording(task_id: &str, seen: &Arc<Mutex<Vec<Value>>>) -> TaskRegistration {
        let seen = Arc::clone(seen);
        TaskRegistration::new(task_id, move |payload| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(payload.clone());
                Ok(payload)
            }
        })
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_fifo_across_interleaved_types() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());

        for task_id in ["t1", "t2", "t1", "t3", "t2", "t1"] {
            store.insert_batch(task_id, vec![json!(null)]).await.unwrap();
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let registrations = ["t1", "t2", "t3"]
            .into_iter()
            .map(|task_id| {
                let order = Arc::clone(&order);
                TaskRegistration::new(task_id, move |_| {
                    let order = Arc::clone(&order);
                    let task_id = task_id.to_string();
                    async move {
                        order.lock().push(task_id);
                        Ok(Value::Null)
                    }
                })
            })
            .collect();

        let scheduler = scheduler(&store, &notifier, registrations);
        let report = scheduler.wake().await.unwrap();

        assert_eq!(report.batches, vec![1; 6]);
        assert_eq!(report.completed, 6);
        assert_eq!(*order.lock(), vec!["t1", "t2", "t1", "t3", "t2", "t1"]);
        assert_eq!(store.count_by_status(TaskStatus::Completed), 6);
    }

    #[tokio::test]
    async fn test_completed_and_failed_outcomes_persisted() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());

        let ids = store
            .insert_batch("math", vec![json!(4), json!("fail"), json!("panic")])
            .await
            .unwrap();

        let registration = TaskRegistration::new("math", |payload| async move {
            match payload.as_str() {
                Some("fail") => Err(TaskError::handler("boom")),
                Some("panic") => panic!("handler exploded"),
                _ => Ok(json!({"squared": payload.as_i64().unwrap_or(0).pow(2)})),
            }
        })
        .with_batch_size(3);

        let report = scheduler(&store, &notifier, vec![registration])
            .wake()
            .await
            .unwrap();

        assert_eq!(report.batches, vec![3]);
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 2);

        let ok = store.get(ids[0]).unwrap();
        assert_eq!(ok.status, TaskStatus::Completed);
        assert_eq!(ok.result, Some(json!({"squared": 16})));
        assert!(ok.log.is_none());

        let failed = store.get(ids[1]).unwrap();
        assert_eq!(failed.status, TaskStatus::Error);
        assert_eq!(failed.log, Some(TaskError::handler("boom")));
        assert!(failed.result.is_none());

        let panicked = store.get(ids[2]).unwrap();
        assert_eq!(panicked.status, TaskStatus::Error);
        let log = panicked.log.unwrap();
        assert_eq!(log.kind, TaskError::PANIC);
        assert_eq!(log.message, "handler exploded");
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_wakes() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        store.insert_batch("slow", vec![json!(1)]).await.unwrap();

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(Mutex::new(Some(started_tx)));
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let calls = Arc::new(Mutex::new(0usize));

        let registration = {
            let calls = Arc::clone(&calls);
            TaskRegistration::new("slow", move |_| {
                let started_tx = started_tx.lock().take();
                let release_rx = Arc::clone(&release_rx);
                let calls = Arc::clone(&calls);
                async move {
                    *calls.lock() += 1;
                    if let Some(tx) = started_tx {
                        let _ = tx.send(());
                    }
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok(Value::Null)
                }
            })
        };

        let scheduler = scheduler(&store, &notifier, vec![registration]);
        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.wake().await }
        });

        started_rx.await.unwrap();
        assert!(scheduler.is_draining());

        // Concurrent wakes return immediately without draining
        for _ in 0..5 {
            assert_eq!(scheduler.wake().await, None);
        }

        release_tx.send(()).unwrap();
        let report = first.await.unwrap().unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(*calls.lock(), 1);
        assert!(!scheduler.is_draining());

        // The flag is released: the next wake drains again
        assert!(scheduler.wake().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_schedulers_claim_disjoint_rows() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());

        let payloads = (0..100).map(|i| json!(i)).collect();
        let ids = store.insert_batch("work", payloads).await.unwrap();

        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let a = scheduler(
            &store,
            &notifier,
            vec![recording("work", &seen_a).with_batch_size(7)],
        );
        let b = scheduler(
            &store,
            &notifier,
            vec![recording("work", &seen_b).with_batch_size(3)],
        );

        let (report_a, report_b) = tokio::join!(a.wake(), b.wake());
        let (report_a, report_b) = (report_a.unwrap(), report_b.unwrap());
        assert_eq!(report_a.completed + report_b.completed, 100);

        let seen_a: HashSet<i64> = seen_a.lock().iter().filter_map(Value::as_i64).collect();
        let seen_b: HashSet<i64> = seen_b.lock().iter().filter_map(Value::as_i64).collect();
        assert!(seen_a.is_disjoint(&seen_b));
        assert_eq!(seen_a.len() + seen_b.len(), ids.len());
        assert_eq!(store.count_by_status(TaskStatus::Completed), 100);
    }

    #[tokio::test]
    async fn test_status_published_after_persist() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let observed_store = Arc::clone(&store);
        notifier
            .subscribe(
                &status_channel("jobs"),
                notification_handler(move |n| {
                    let sink = Arc::clone(&sink);
                    let store = Arc::clone(&observed_store);
                    async move {
                        let id = n.payload["id"].as_i64().unwrap_or_default();
                        let persisted = store.get(id).map(|r| r.status);
                        sink.lock().push((n.payload["status"].clone(), persisted));
                    }
                }),
            )
            .await
            .unwrap();

        let registration = TaskRegistration::new("jobs", |_| async { Ok(json!("done")) });
        store.insert_batch("jobs", vec![json!(1)]).await.unwrap();
        scheduler(&store, &notifier, vec![registration]).wake().await;

        wait_until(|| seen.lock().len() == 2).await;
        let seen = seen.lock().clone();
        assert_eq!(seen[0].0, json!("processing"));
        assert_eq!(seen[1], (json!("completed"), Some(TaskStatus::Completed)));
    }

    #[tokio::test]
    async fn test_retention_runs_after_drain() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());

        let old = store.insert_batch("archive", vec![json!(1)]).await.unwrap()[0];
        store.set_created_at(old, Utc::now() - chrono::Duration::days(40));
        store.insert_batch("fresh", vec![json!(2)]).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let scheduler = Scheduler::new(
            store.clone(),
            notifier,
            HandlerRegistry::new([recording("fresh", &seen)]),
            SchedulerConfig::default(),
            Some(RetentionSweep::from_ttl(store.clone(), "30 days").unwrap()),
        );

        let report = scheduler.wake().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.swept, 1);
        assert!(store.get(old).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_start_wakes_immediately_and_on_notification() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        store.insert_batch("mail", vec![json!("early")]).await.unwrap();

        let scheduler = Scheduler::new(
            store.clone(),
            notifier.clone(),
            HandlerRegistry::new([recording("mail", &seen)]),
            SchedulerConfig::default().with_poll_interval(Duration::from_secs(3600)),
            None,
        );
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        wait_until(|| seen.lock().len() == 1).await;
        wait_until(|| !scheduler.is_draining()).await;

        store.insert_batch("mail", vec![json!("late")]).await.unwrap();
        notifier
            .publish(WORK_PENDING_CHANNEL, json!({}))
            .await
            .unwrap();

        wait_until(|| seen.lock().len() == 2).await;
        assert_eq!(*seen.lock(), vec![json!("early"), json!("late")]);

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_timer_wakes_without_notification() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let scheduler = Scheduler::new(
            store.clone(),
            notifier,
            HandlerRegistry::new([recording("tick", &seen)]),
            SchedulerConfig::default().with_poll_interval(Duration::from_millis(20)),
            None,
        );
        scheduler.start().await.unwrap();

        // Inserted behind the scheduler's back: only the timer can find it
        store.insert_batch("tick", vec![json!(1)]).await.unwrap();
        wait_until(|| seen.lock().len() == 1).await;

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_wakes_and_times_out_on_stuck_drain() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        store.insert_batch("stuck", vec![json!(1)]).await.unwrap();

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let registration = TaskRegistration::new("stuck", move |_| {
            let release_rx = Arc::clone(&release_rx);
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(Value::Null)
            }
        });

        let scheduler = Scheduler::new(
            store.clone(),
            notifier,
            HandlerRegistry::new([registration]),
            SchedulerConfig::default().with_shutdown_timeout(Duration::from_millis(50)),
            None,
        );

        let drain = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.wake().await }
        });
        wait_until(|| scheduler.is_draining()).await;

        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::ShutdownTimeout)
        ));
        assert_eq!(scheduler.wake().await, None);

        release_tx.send(()).unwrap();
        let report = drain.await.unwrap().unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(store.count_by_status(TaskStatus::Completed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_lets_running_cycle_drain_to_exhaustion() {
        let store = Arc::new(InMemoryTaskStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        store
            .insert_batch("slow", (0..5).map(|i| json!(i)).collect())
            .await
            .unwrap();
        let expired = store.insert_batch("other", vec![json!(null)]).await.unwrap();
        store.set_created_at(expired[0], Utc::now() - chrono::Duration::days(40));

        let registration = TaskRegistration::new("slow", |payload| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(payload)
        });
        let scheduler = Scheduler::new(
            store.clone(),
            notifier,
            HandlerRegistry::new([registration]),
            SchedulerConfig::default(),
            Some(RetentionSweep::from_ttl(store.clone(), "30 days").unwrap()),
        );

        let drain = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.wake().await }
        });
        wait_until(|| store.count_by_status(TaskStatus::Processing) == 1).await;

        scheduler.shutdown().await.unwrap();

        let report = drain.await.unwrap().unwrap();
        assert_eq!(report.batches, vec![1, 1, 1, 1, 1]);
        assert_eq!(report.completed, 5);
        assert_eq!(report.swept, 1);
        assert_eq!(store.count_by_status(TaskStatus::Pending), 0);
        assert_eq!(store.count_by_status(TaskStatus::Completed), 5);
        assert!(!scheduler.is_draining());
    }
}
