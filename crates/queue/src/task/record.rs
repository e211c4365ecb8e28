//! Task record, status machine and status notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskError;

/// Task status in the queue
///
/// Status only moves forward: `Pending -> Processing -> Completed | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Inserted, waiting to be claimed
    Pending,

    /// Claimed by a drain cycle, handler running
    Processing,

    /// Handler returned successfully
    Completed,

    /// Handler failed, or the claim transaction failed
    Error,
}

impl TaskStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Error,
    ];

    /// Lowercase name as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether the row still counts as outstanding work
    pub fn is_outstanding(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is an allowed transition
    ///
    /// `Pending -> Error` is allowed for rows whose claim transaction was
    /// rolled back; they are terminal from then on.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Error)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Returned when parsing an unknown status string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);

/// A persisted unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Auto-increment id, defines FIFO order
    pub id: i64,

    /// Task type (logical queue name)
    pub task_id: String,

    pub status: TaskStatus,

    pub payload: serde_json::Value,

    /// Set only when `status == Completed`
    pub result: Option<serde_json::Value>,

    /// Set only when `status == Error`
    pub log: Option<TaskError>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Whether the record reached a final status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Final outcome written back by the scheduler or the claim engine
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Handler succeeded with this result
    Completed(serde_json::Value),

    /// Handler (or claim) failed with this detail
    Failed(TaskError),
}

impl TaskOutcome {
    /// Status this outcome moves the record to
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Error,
        }
    }
}

impl From<Result<serde_json::Value, TaskError>> for TaskOutcome {
    fn from(result: Result<serde_json::Value, TaskError>) -> Self {
        match result {
            Ok(value) => Self::Completed(value),
            Err(error) => Self::Failed(error),
        }
    }
}

/// Message published on a task type's status channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotification {
    pub task_id: String,
    pub status: TaskStatus,
    pub id: i64,
}

impl StatusNotification {
    /// Create a notification for a record id
    pub fn new(task_id: impl Into<String>, status: TaskStatus, id: i64) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            id,
        }
    }
}
