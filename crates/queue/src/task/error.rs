//! Serializable error detail stored in a task's `log`

use serde::{Deserialize, Serialize};

/// Error detail for failed tasks
///
/// Handler failures are data, not exceptions: whatever the handler returns
/// is normalized into this shape and persisted in the record's `log`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Error category (`handler`, `panic`, `claim`, `payload`, ...)
    pub kind: String,

    /// Human readable message
    pub message: String,

    /// Additional error details (source chain, context)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TaskError {
    pub const HANDLER: &'static str = "handler";
    pub const PANIC: &'static str = "panic";
    pub const CLAIM: &'static str = "claim";
    pub const PAYLOAD: &'static str = "payload";
    pub const UNREGISTERED: &'static str = "unregistered";

    /// Create an error of an arbitrary kind
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Error returned by a task handler
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(Self::HANDLER, message)
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Build from any error, keeping its source chain in `details`
    pub fn from_error(kind: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(serde_json::Value::String(cause.to_string()));
            source = cause.source();
        }

        let error = Self::new(kind, err.to_string());
        if chain.is_empty() {
            error
        } else {
            error.with_details(serde_json::json!({ "causes": chain }))
        }
    }

    /// Interpret a stored `log` value
    ///
    /// Rows written by other producers may carry a bare string or an
    /// arbitrary document; those are wrapped rather than rejected.
    pub fn from_log(value: serde_json::Value) -> Self {
        match serde_json::from_value::<TaskError>(value.clone()) {
            Ok(error) => error,
            Err(_) => match value {
                serde_json::Value::String(message) => Self::new("unknown", message),
                other => Self::new("unknown", other.to_string()).with_details(other),
            },
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        let chain: Vec<serde_json::Value> = err
            .chain()
            .skip(1)
            .map(|cause| serde_json::Value::String(cause.to_string()))
            .collect();
        let error = Self::handler(err.to_string());
        if chain.is_empty() {
            error
        } else {
            error.with_details(serde_json::json!({ "causes": chain }))
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(Self::PAYLOAD, err.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::handler(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::handler(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_is_handler_error() {
        let error: TaskError = "boom".into();
        assert_eq!(error.kind, TaskError::HANDLER);
        assert_eq!(error.message, "boom");
        assert!(error.details.is_none());
    }

    #[test]
    fn test_anyhow_context_kept_as_causes() {
        let err = anyhow::anyhow!("connection refused").context("failed to send email");
        let error = TaskError::from(err);
        assert_eq!(error.message, "failed to send email");
        assert_eq!(
            error.details,
            Some(serde_json::json!({"causes": ["connection refused"]}))
        );
    }

    #[test]
    fn test_from_log_accepts_legacy_strings() {
        let error = TaskError::from_log(serde_json::json!("Error: boom"));
        assert_eq!(error.kind, "unknown");
        assert_eq!(error.message, "Error: boom");

        let stored = serde_json::to_value(TaskError::handler("boom")).unwrap();
        assert_eq!(TaskError::from_log(stored), TaskError::handler("boom"));
    }

    #[test]
    fn test_details_omitted_when_empty() {
        let json = serde_json::to_value(TaskError::handler("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "handler", "message": "boom"}));
    }
}
