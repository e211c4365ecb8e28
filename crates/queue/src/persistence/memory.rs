//! In-memory implementation of TaskStore for testing

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::store::*;
use crate::task::{TaskError, TaskOutcome, TaskRecord, TaskStatus};

#[derive(Default)]
struct Tables {
    next_id: i64,
    rows: BTreeMap<i64, TaskRecord>,
}

/// In-memory implementation of TaskStore
///
/// This is primarily for testing. Rows live in an id-ordered map behind a
/// single lock, so a claim selects and transitions its rows atomically and
/// two concurrent claims can never return the same row, which is what
/// SKIP LOCKED guarantees in PostgreSQL.
///
/// # Example
///
/// ```
/// use pgqueue::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert_eq!(store.len(), 0);
/// ```
pub struct InMemoryTaskStore {
    tables: RwLock<Tables>,
}

impl InMemoryTaskStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Get the number of stored rows
    pub fn len(&self) -> usize {
        self.tables.read().rows.len()
    }

    /// Whether the store holds no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the number of rows with the given status
    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tables
            .read()
            .rows
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// Get a copy of one row
    pub fn get(&self, id: i64) -> Option<TaskRecord> {
        self.tables.read().rows.get(&id).cloned()
    }

    /// Get a copy of every row, in id order
    pub fn all(&self) -> Vec<TaskRecord> {
        self.tables.read().rows.values().cloned().collect()
    }

    /// Overwrite a row's creation time (for retention tests)
    pub fn set_created_at(&self, id: i64, created_at: DateTime<Utc>) -> bool {
        match self.tables.write().rows.get_mut(&id) {
            Some(row) => {
                row.created_at = created_at;
                true
            }
            None => false,
        }
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.tables.write().rows.clear();
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_batch(
        &self,
        task_id: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let mut ids = Vec::with_capacity(payloads.len());

        for payload in payloads {
            tables.next_id += 1;
            let id = tables.next_id;
            tables.rows.insert(
                id,
                TaskRecord {
                    id,
                    task_id: task_id.to_string(),
                    status: TaskStatus::Pending,
                    payload,
                    result: None,
                    log: None,
                    created_at: now,
                    updated_at: now,
                },
            );
            ids.push(id);
        }

        Ok(ids)
    }

    async fn find_oldest_pending(
        &self,
        task_ids: &[String],
    ) -> Result<Option<String>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .values()
            .find(|r| r.status == TaskStatus::Pending && task_ids.contains(&r.task_id))
            .map(|r| r.task_id.clone()))
    }

    async fn claim_batch(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, ClaimError> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let mut claimed = vec![];

        for row in tables.rows.values_mut() {
            if claimed.len() >= limit {
                break;
            }

            if row.status == TaskStatus::Pending && row.task_id == task_id {
                row.status = TaskStatus::Processing;
                row.updated_at = now;
                claimed.push(row.clone());
            }
        }

        Ok(claimed)
    }

    async fn update_status(&self, id: i64, outcome: TaskOutcome) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let Some(row) = tables.rows.get_mut(&id) else {
            return Ok(false);
        };

        if row.status != TaskStatus::Processing {
            return Ok(false);
        }

        row.status = outcome.status();
        row.updated_at = Utc::now();
        match outcome {
            TaskOutcome::Completed(value) => {
                row.result = Some(value);
                row.log = None;
            }
            TaskOutcome::Failed(error) => {
                row.result = None;
                row.log = Some(error);
            }
        }

        Ok(true)
    }

    async fn fail_unclaimed(&self, id: i64, error: TaskError) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        match tables.rows.get_mut(&id) {
            Some(row) if row.status == TaskStatus::Pending => {
                row.status = TaskStatus::Error;
                row.updated_at = Utc::now();
                row.result = None;
                row.log = Some(error);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();
        let before = tables.rows.len();
        tables.rows.retain(|_, r| r.created_at > cutoff);
        Ok((before - tables.rows.len()) as u64)
    }

    async fn count_outstanding(
        &self,
        task_id: &str,
        ids: Option<&[i64]>,
    ) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        let count = tables
            .rows
            .values()
            .filter(|r| r.task_id == task_id && r.status.is_outstanding())
            .filter(|r| ids.map_or(true, |ids| ids.contains(&r.id)))
            .count();
        Ok(count as u64)
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<TaskRecord>, StoreError> {
        let tables = self.tables.read();
        let mut found: Vec<TaskRecord> = ids
            .iter()
            .filter_map(|id| tables.rows.get(id).cloned())
            .collect();
        found.sort_by_key(|r| r.id);
        found.dedup_by_key(|r| r.id);
        Ok(found)
    }
}
