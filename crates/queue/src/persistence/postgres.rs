//! PostgreSQL implementation of TaskStore
//!
//! Production persistence using PostgreSQL with:
//! - FIFO claiming with FOR UPDATE SKIP LOCKED
//! - Status updates guarded against terminal rows
//! - Indexed probe, claim and retention queries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, error, instrument, warn};

use super::store::*;
use crate::task::{TaskError, TaskOutcome, TaskRecord, TaskStatus};

/// Schema for the task table
pub const SCHEMA_SQL: &str = include_str!("../../migrations/0001_create_tasks.sql");

/// Rows per INSERT statement (two bind parameters per row, Postgres caps at 65535)
const INSERT_CHUNK: usize = 10_000;

const RECORD_COLUMNS: &str =
    "id, task_id, status, payload, result, log, created_at, updated_at";

/// PostgreSQL implementation of TaskStore
///
/// Uses a connection pool; concurrent schedulers in any number of processes
/// can share the same table.
///
/// # Example
///
/// ```ignore
/// use pgqueue::PostgresTaskStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/mydb").await?;
/// let store = PostgresTaskStore::new(pool);
/// store.ensure_schema().await?;
/// ```
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to create task table: {}", e);
                StoreError::Database(e.to_string())
            })?;

        debug!("task table ready");
        Ok(())
    }

    #[instrument(skip(self, payloads), fields(count = payloads.len()))]
    async fn insert_batch(
        &self,
        task_id: &str,
        payloads: Vec<serde_json::Value>,
    ) -> Result<Vec<i64>, StoreError> {
        if payloads.is_empty() {
            return Ok(vec![]);
        }

        let mut tx = self.pool.begin().await.map_err(database_error)?;
        let mut ids = Vec::with_capacity(payloads.len());

        for chunk in payloads.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO pgqueue_tasks (task_id, payload) ");
            builder.push_values(chunk, |mut row, payload| {
                row.push_bind(task_id).push_bind(payload);
            });
            builder.push(" RETURNING id");

            let rows = builder.build().fetch_all(&mut *tx).await.map_err(|e| {
                error!("Failed to insert tasks: {}", e);
                StoreError::Database(e.to_string())
            })?;

            let mut chunk_ids = rows
                .iter()
                .map(|row| row.try_get::<i64, _>("id"))
                .collect::<Result<Vec<_>, _>>()
                .map_err(database_error)?;
            // Ids come from one sequence, so ascending order is insertion order
            chunk_ids.sort_unstable();
            ids.extend(chunk_ids);
        }

        tx.commit().await.map_err(database_error)?;

        debug!(task_id, count = ids.len(), "inserted tasks");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn find_oldest_pending(
        &self,
        task_ids: &[String],
    ) -> Result<Option<String>, StoreError> {
        if task_ids.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT task_id
            FROM pgqueue_tasks
            WHERE status = 'pending'
              AND task_id = ANY($1)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(task_ids)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to probe pending tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        row.map(|row| row.try_get::<String, _>("task_id"))
            .transpose()
            .map_err(database_error)
    }

    #[instrument(skip(self))]
    async fn claim_batch(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, ClaimError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ClaimError::Selection(database_error(e)))?;

        // Lock-skip: rows held by a concurrent claim are left out, never waited on
        let selected = sqlx::query(
            r#"
            SELECT id
            FROM pgqueue_tasks
            WHERE task_id = $1
              AND status = 'pending'
            ORDER BY id
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(task_id)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await;

        let ids = match selected.and_then(|rows| {
            rows.iter()
                .map(|row| row.try_get::<i64, _>("id"))
                .collect::<Result<Vec<_>, _>>()
        }) {
            Ok(ids) => ids,
            Err(e) => {
                error!(task_id, "Failed to select tasks for claim: {}", e);
                rollback(tx, task_id).await;
                return Err(ClaimError::Selection(database_error(e)));
            }
        };

        if ids.is_empty() {
            rollback(tx, task_id).await;
            return Ok(vec![]);
        }

        let query = format!(
            r#"
            UPDATE pgqueue_tasks
            SET status = 'processing',
                updated_at = NOW()
            WHERE id = ANY($1)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let updated = sqlx::query(&query)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await;

        let rows = match updated {
            Ok(rows) => rows,
            Err(e) => {
                error!(task_id, count = ids.len(), "Failed to transition claimed tasks: {}", e);
                rollback(tx, task_id).await;
                return Err(ClaimError::Transition {
                    ids,
                    source: database_error(e),
                });
            }
        };

        let mut claimed = match rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>() {
            Ok(claimed) => claimed,
            Err(source) => {
                rollback(tx, task_id).await;
                return Err(ClaimError::Transition { ids, source });
            }
        };

        if let Err(e) = tx.commit().await {
            error!(task_id, "Failed to commit claim: {}", e);
            return Err(ClaimError::Transition {
                ids,
                source: database_error(e),
            });
        }

        // RETURNING gives no order guarantee
        claimed.sort_by_key(|record| record.id);

        debug!(task_id, count = claimed.len(), "claimed tasks");
        Ok(claimed)
    }

    #[instrument(skip(self, outcome), fields(status = %outcome.status()))]
    async fn update_status(&self, id: i64, outcome: TaskOutcome) -> Result<bool, StoreError> {
        let status = outcome.status();
        let (result, log) = match outcome {
            TaskOutcome::Completed(value) => (Some(value), None),
            TaskOutcome::Failed(error) => (
                None,
                Some(
                    serde_json::to_value(&error)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                ),
            ),
        };

        let updated = sqlx::query(
            r#"
            UPDATE pgqueue_tasks
            SET status = $2,
                result = $3,
                log = $4,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(result)
        .bind(log)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id, "Failed to update task status: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let applied = updated.rows_affected() > 0;
        debug!(id, %status, applied, "updated task status");
        Ok(applied)
    }

    #[instrument(skip(self, error))]
    async fn fail_unclaimed(&self, id: i64, error: TaskError) -> Result<bool, StoreError> {
        let log = serde_json::to_value(&error)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE pgqueue_tasks
            SET status = 'error',
                result = NULL,
                log = $2,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(log)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(id, "Failed to mark unclaimed task as error: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM pgqueue_tasks
            WHERE created_at <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to delete old tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(deleted.rows_affected())
    }

    #[instrument(skip(self, ids))]
    async fn count_outstanding(
        &self,
        task_id: &str,
        ids: Option<&[i64]>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS outstanding
            FROM pgqueue_tasks
            WHERE task_id = $1
              AND status IN ('pending', 'processing')
              AND ($2::BIGINT[] IS NULL OR id = ANY($2))
            "#,
        )
        .bind(task_id)
        .bind(ids.map(|ids| ids.to_vec()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count outstanding tasks: {}", e);
            StoreError::Database(e.to_string())
        })?;

        let count: i64 = row.try_get("outstanding").map_err(database_error)?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<TaskRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM pgqueue_tasks
            WHERE id = ANY($1)
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to fetch tasks: {}", e);
                StoreError::Database(e.to_string())
            })?;

        rows.iter().map(record_from_row).collect()
    }
}

/// Roll back a claim transaction, logging instead of failing
async fn rollback(tx: Transaction<'_, Postgres>, task_id: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(task_id, "Failed to roll back claim transaction: {}", e);
    }
}

fn database_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_task_status(status: &str) -> Result<TaskStatus, StoreError> {
    status
        .parse()
        .map_err(|_| StoreError::InvalidStatus(status.to_string()))
}

fn record_from_row(row: &PgRow) -> Result<TaskRecord, StoreError> {
    let status: String = row.try_get("status").map_err(database_error)?;
    let log: Option<serde_json::Value> = row.try_get("log").map_err(database_error)?;

    Ok(TaskRecord {
        id: row.try_get("id").map_err(database_error)?,
        task_id: row.try_get("task_id").map_err(database_error)?,
        status: parse_task_status(&status)?,
        payload: row.try_get("payload").map_err(database_error)?,
        result: row.try_get("result").map_err(database_error)?,
        log: log.map(TaskError::from_log),
        created_at: row.try_get("created_at").map_err(database_error)?,
        updated_at: row.try_get("updated_at").map_err(database_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_status() {
        assert_eq!(parse_task_status("pending").unwrap(), TaskStatus::Pending);
        assert_eq!(parse_task_status("error").unwrap(), TaskStatus::Error);
        assert!(matches!(
            parse_task_status("claimed"),
            Err(StoreError::InvalidStatus(s)) if s == "claimed"
        ));
    }

    #[test]
    fn test_schema_declares_claim_and_retention_indexes() {
        assert!(SCHEMA_SQL.contains("CREATE TABLE IF NOT EXISTS pgqueue_tasks"));
        assert!(SCHEMA_SQL.contains("(task_id, status, id)"));
        assert!(SCHEMA_SQL.contains("(created_at)"));
    }
}
