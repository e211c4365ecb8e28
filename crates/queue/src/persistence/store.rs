//! TaskStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::task::{TaskError, TaskOutcome, TaskRecord};

/// Error type for store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A row carried a status outside the task state machine
    #[error("invalid task status: {0}")]
    InvalidStatus(String),
}

/// Error type for [`TaskStore::claim_batch`]
///
/// Both variants leave the candidate rows `pending`: the claim transaction
/// was rolled back.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClaimError {
    /// The locking read failed; no rows were selected
    #[error("claim selection failed: {0}")]
    Selection(#[source] StoreError),

    /// Rows were selected but their transition to `processing` failed
    #[error("claim transition failed for {} rows: {source}", ids.len())]
    Transition {
        ids: Vec<i64>,
        #[source]
        source: StoreError,
    },
}

/// Store for task records
///
/// This trait defines the persistence contract the claim engine, scheduler
/// and dispatch API rely on. Implementations must be thread-safe and support
/// concurrent access from several schedulers.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Create the task table and its indexes if missing
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Append pending rows, returning generated ids in insertion order
    async fn insert_batch(
        &self,
        task_id: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<i64>, StoreError>;

    /// Task type of the oldest pending row among `task_ids`
    ///
    /// A cheap probe: takes no row locks.
    async fn find_oldest_pending(&self, task_ids: &[String])
        -> Result<Option<String>, StoreError>;

    /// Claim up to `limit` pending rows of `task_id` in id order
    ///
    /// Uses SELECT FOR UPDATE SKIP LOCKED inside one transaction and moves the
    /// selected rows to `processing` before commit. Rows locked by a
    /// concurrent claimer are skipped, so this may return fewer rows than are
    /// pending, or none.
    async fn claim_batch(&self, task_id: &str, limit: usize)
        -> Result<Vec<TaskRecord>, ClaimError>;

    /// Write a handler outcome for one `processing` row
    ///
    /// Pending and terminal rows are never touched. Returns whether the row
    /// changed.
    async fn update_status(&self, id: i64, outcome: TaskOutcome) -> Result<bool, StoreError>;

    /// Mark a row of a rolled-back claim as `error`
    ///
    /// Only applies while the row is still `pending`: once the rollback
    /// released its lock another claimer may own it, and that claim wins.
    async fn fail_unclaimed(&self, id: i64, error: TaskError) -> Result<bool, StoreError>;

    /// Delete all rows created before `cutoff`, whatever their status
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Count `pending` + `processing` rows of `task_id`, optionally restricted to `ids`
    async fn count_outstanding(
        &self,
        task_id: &str,
        ids: Option<&[i64]>,
    ) -> Result<u64, StoreError>;

    /// Fetch rows by id, ordered by id
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<TaskRecord>, StoreError>;
}
