//! Handler registry: task type -> (handler, batch size)
//!
//! Built once when a scheduler is subscribed, then only read.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::task::{Task, TaskError};

/// Task execution result
pub type TaskResult = Result<Value, TaskError>;

/// Task handler function type
pub type TaskHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = TaskResult> + Send>> + Send + Sync>;

/// Default number of rows claimed per batch
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// A handler for one task type
///
/// # Example
///
/// ```
/// use pgqueue::TaskRegistration;
/// use serde_json::json;
///
/// let registration = TaskRegistration::new("resize_image", |payload| async move {
///     Ok(json!({ "resized": payload }))
/// })
/// .with_batch_size(5);
///
/// assert_eq!(registration.batch_size(), 5);
/// ```
#[derive(Clone)]
pub struct TaskRegistration {
    task_id: String,
    handler: TaskHandler,
    batch_size: usize,
}

impl TaskRegistration {
    /// Register a JSON handler for `task_id`
    pub fn new<F, Fut>(task_id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            task_id: task_id.into(),
            handler: Arc::new(move |payload| Box::pin(handler(payload))),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Register a typed [`Task`] under `T::TYPE`
    ///
    /// Payloads that do not decode into `T::Input` fail with a `payload` error.
    pub fn typed<T: Task>(task: T) -> Self {
        let task = Arc::new(task);
        Self::new(T::TYPE, move |payload| {
            let task = Arc::clone(&task);
            async move {
                let input: T::Input = serde_json::from_value(payload)?;
                let output = task.run(input).await?;
                serde_json::to_value(output).map_err(|e| TaskError::new("result", e.to_string()))
            }
        })
    }

    /// Set how many rows are claimed (and run concurrently) per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl std::fmt::Debug for TaskRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistration")
            .field("task_id", &self.task_id)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

struct RegisteredTask {
    handler: TaskHandler,
    batch_size: usize,
}

/// Registry of task handlers keyed by task type
///
/// Registering a task type twice keeps the last handler.
pub struct HandlerRegistry {
    tasks: HashMap<String, RegisteredTask>,
    task_ids: Vec<String>,
}

impl HandlerRegistry {
    /// Build a registry from registrations
    pub fn new(registrations: impl IntoIterator<Item = TaskRegistration>) -> Self {
        let mut tasks = HashMap::new();
        let mut task_ids = Vec::new();

        for registration in registrations {
            if !tasks.contains_key(&registration.task_id) {
                task_ids.push(registration.task_id.clone());
            }
            tasks.insert(
                registration.task_id,
                RegisteredTask {
                    handler: registration.handler,
                    batch_size: registration.batch_size,
                },
            );
        }

        Self { tasks, task_ids }
    }

    /// Registered task types, in registration order
    pub fn task_ids(&self) -> &[String] {
        &self.task_ids
    }

    /// Batch size for a task type
    pub fn batch_size(&self, task_id: &str) -> Option<usize> {
        self.tasks.get(task_id).map(|t| t.batch_size)
    }

    /// Handler for a task type
    pub fn handler(&self, task_id: &str) -> Option<TaskHandler> {
        self.tasks.get(task_id).map(|t| Arc::clone(&t.handler))
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let batches: Vec<(&str, usize)> = self
            .task_ids
            .iter()
            .map(|id| (id.as_str(), self.tasks[id].batch_size))
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("tasks", &batches)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    #[derive(Serialize)]
    struct AddOutput {
        sum: i64,
    }

    struct Add;

    #[async_trait]
    impl Task for Add {
        const TYPE: &'static str = "add";
        type Input = AddInput;
        type Output = AddOutput;

        async fn run(&self, input: Self::Input) -> Result<Self::Output, TaskError> {
            Ok(AddOutput {
                sum: input.a + input.b,
            })
        }
    }

    #[test]
    fn test_batch_size_defaults_and_floor() {
        let registration = TaskRegistration::new("t", |_| async { Ok(Value::Null) });
        assert_eq!(registration.batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(registration.with_batch_size(0).batch_size(), 1);
    }

    #[test]
    fn test_registry_keeps_order_and_last_handler() {
        let registry = HandlerRegistry::new(vec![
            TaskRegistration::new("b", |_| async { Ok(json!(1)) }),
            TaskRegistration::new("a", |_| async { Ok(json!(2)) }).with_batch_size(3),
            TaskRegistration::new("b", |_| async { Ok(json!(3)) }).with_batch_size(7),
        ]);

        assert_eq!(registry.task_ids(), &["b".to_string(), "a".to_string()]);
        assert_eq!(registry.batch_size("a"), Some(3));
        assert_eq!(registry.batch_size("b"), Some(7));
        assert_eq!(registry.batch_size("c"), None);
        assert!(registry.handler("c").is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = HandlerRegistry::new(vec![
            TaskRegistration::new("b", |_| async { Ok(json!(1)) }),
            TaskRegistration::new("b", |_| async { Ok(json!(3)) }),
        ]);

        let handler = registry.handler("b").unwrap();
        assert_eq!(handler(Value::Null).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_typed_task_round_trips_payload() {
        let registration = TaskRegistration::typed(Add);
        assert_eq!(registration.task_id(), "add");

        let registry = HandlerRegistry::new([registration]);
        let handler = registry.handler("add").unwrap();

        let output = handler(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(output, json!({"sum": 5}));

        let error = handler(json!({"a": "two"})).await.unwrap_err();
        assert_eq!(error.kind, TaskError::PAYLOAD);
    }
}
