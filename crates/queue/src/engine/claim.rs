//! Claim engine: lock and transition one batch of pending rows

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use super::HandlerRegistry;
use crate::notify::{publish_status, Notifier};
use crate::persistence::{ClaimError, StoreError, TaskStore};
use crate::task::{StatusNotification, TaskError, TaskRecord, TaskStatus};

/// Result of one claim attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// Rows moved to `processing`, in id order
    Batch(Vec<TaskRecord>),

    /// Nothing to claim: no pending rows, or all of them locked elsewhere
    Empty,

    /// The claim transaction failed and its rows were marked `error`; probe again
    Retry,
}

/// Selects the oldest pending task type and claims one batch of it
#[derive(Clone)]
pub struct ClaimEngine {
    store: Arc<dyn TaskStore>,
    notifier: Arc<dyn Notifier>,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn TaskStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Claim one batch for the registered task types
    ///
    /// The batch belongs to whichever registered type has the oldest pending
    /// row, and is at most that type's batch size. Returns `Err` only when the
    /// probe fails or every row of a failed claim could not be marked.
    #[instrument(skip(self, registry), fields(task_types = registry.len()))]
    pub async fn claim_one_batch(
        &self,
        registry: &HandlerRegistry,
    ) -> Result<ClaimOutcome, StoreError> {
        if registry.is_empty() {
            return Ok(ClaimOutcome::Empty);
        }

        let Some(task_id) = self.store.find_oldest_pending(registry.task_ids()).await? else {
            return Ok(ClaimOutcome::Empty);
        };

        let limit = registry.batch_size(&task_id).unwrap_or(1);

        match self.store.claim_batch(&task_id, limit).await {
            Ok(records) if records.is_empty() => {
                debug!(task_id = %task_id, "Pending rows locked by another claimer");
                Ok(ClaimOutcome::Empty)
            }
            Ok(records) => {
                debug!(task_id = %task_id, count = records.len(), "Claimed batch");
                for record in &records {
                    publish_status(
                        self.notifier.as_ref(),
                        &StatusNotification::new(&record.task_id, TaskStatus::Processing, record.id),
                    )
                    .await;
                }
                Ok(ClaimOutcome::Batch(records))
            }
            Err(ClaimError::Selection(e)) => {
                warn!(task_id = %task_id, "Claim selection failed: {}", e);
                Ok(ClaimOutcome::Empty)
            }
            Err(ClaimError::Transition { ids, source }) => {
                self.fail_claimed(&task_id, &ids, &source).await
            }
        }
    }

    /// Mark rows of a rolled-back claim as `error`
    ///
    /// Rows another claimer picked up after the rollback are left alone.
    async fn fail_claimed(
        &self,
        task_id: &str,
        ids: &[i64],
        source: &StoreError,
    ) -> Result<ClaimOutcome, StoreError> {
        error!(task_id = %task_id, count = ids.len(), "Claim transition failed: {}", source);

        let log = TaskError::from_error(TaskError::CLAIM, source);
        let mut last_error = None;
        let mut marked = 0usize;

        for &id in ids {
            match self.store.fail_unclaimed(id, log.clone()).await {
                Ok(changed) => {
                    marked += 1;
                    if changed {
                        publish_status(
                            self.notifier.as_ref(),
                            &StatusNotification::new(task_id, TaskStatus::Error, id),
                        )
                        .await;
                    }
                }
                Err(e) => {
                    error!(task_id = %task_id, id, "Failed to mark claimed row as error: {}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if marked == 0 => Err(e),
            _ => Ok(ClaimOutcome::Retry),
        }
    }
}

impl std::fmt::Debug for ClaimEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimEngine").finish_non_exhaustive()
    }
}
