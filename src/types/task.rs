//! Task payloads and results as exchanged with workers
//!
//! A payload is encoded once by the packager and never mutated afterwards.
//! Workers answer with a [`TaskResult`] encoded as JSON.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a task inside its job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Call,
    Map,
    Reduce,
}

/// Self-contained unit a worker executes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub job_id: String,
    /// Task position within the job
    pub index: usize,
    pub kind: TaskKind,
    /// Catalog name of the function to run
    pub function: String,
    /// Partition data handed to the function
    pub data: Value,
    /// Extra arguments shared by every task of the job
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

/// Encoded, immutable task payload plus its identity
#[derive(Debug, Clone)]
pub struct PackagedTask {
    pub job_id: String,
    pub index: usize,
    pub kind: TaskKind,
    pub function: String,
    /// Encoded [`TaskPayload`]
    pub bytes: Arc<[u8]>,
    /// Hex SHA-256 of `bytes`
    pub digest: String,
    /// Execution timeout applied to every attempt of this task
    pub timeout: Option<Duration>,
}

impl PackagedTask {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Decode the payload back into its structured form
    pub fn decode(&self) -> serde_json::Result<TaskPayload> {
        serde_json::from_slice(&self.bytes)
    }
}

/// Marker key for error values embedded in result data
pub const ERROR_MARKER: &str = "__fanout_error__";

/// An error captured as data instead of propagated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedError {
    /// Short classifier, e.g. "user", "panic", "dependency"
    pub kind: String,
    pub message: String,
}

impl TaggedError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new("user", message)
    }

    /// Embed as a JSON value (used for reducer inputs)
    pub fn to_value(&self) -> Value {
        serde_json::json!({ ERROR_MARKER: { "kind": self.kind, "message": self.message } })
    }

    /// Recognize a value produced by [`TaggedError::to_value`]
    pub fn from_value(value: &Value) -> Option<Self> {
        let inner = value.as_object()?.get(ERROR_MARKER)?;
        serde_json::from_value(inner.clone()).ok()
    }
}

impl std::fmt::Display for TaggedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a worker sends back for one activation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Ok { value: Value },
    Error { error: TaggedError },
}

impl TaskResult {
    pub fn ok(value: Value) -> Self {
        TaskResult::Ok { value }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        TaskResult::Error {
            error: TaggedError::new(kind, message),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // TaskResult only holds JSON values and strings
        serde_json::to_vec(self).unwrap_or_else(|e| {
            format!(
                r#"{{"status":"error","error":{{"kind":"encoding","message":"{}"}}}}"#,
                e.to_string().replace('"', "'")
            )
            .into_bytes()
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
