//! Strongly typed task trait

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use super::TaskError;

/// A typed unit of work
///
/// Implementations are adapted to the JSON handler registry with
/// [`TaskRegistration::typed`](crate::engine::TaskRegistration::typed): the
/// payload is decoded into `Input`, the returned `Output` is encoded into the
/// record's `result`.
///
/// # Example
///
/// ```ignore
/// use pgqueue::prelude::*;
///
/// struct SendEmail;
///
/// #[async_trait]
/// impl Task for SendEmail {
///     const TYPE: &'static str = "send_email";
///     type Input = SendEmailInput;
///     type Output = SendEmailOutput;
///
///     async fn run(&self, input: Self::Input) -> Result<Self::Output, TaskError> {
///         // Send email...
///         Ok(SendEmailOutput { message_id: "..." })
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Task type name used as `task_id`
    const TYPE: &'static str;

    /// Payload type
    type Input: DeserializeOwned + Send;

    /// Result type
    type Output: Serialize + Send;

    /// Execute the task
    async fn run(&self, input: Self::Input) -> Result<Self::Output, TaskError>;
}
