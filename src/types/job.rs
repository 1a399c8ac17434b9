//! Job and activation identities

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identity of one caller-issued job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh job id scoped to an executor
    pub fn generate(executor_id: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        JobId(format!("{}-{}", executor_id, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-specific handle for one in-flight or completed task execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivationId(String);

impl ActivationId {
    pub fn new(value: impl Into<String>) -> Self {
        ActivationId(value.into())
    }

    /// Generate a backend-prefixed activation id (e.g. "local-1a2b3c4d")
    pub fn generate(prefix: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        ActivationId(format!("{}-{}", prefix, &suffix[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which façade operation created a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    CallAsync,
    Map,
    MapReduce,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::CallAsync => write!(f, "call_async"),
            JobKind::Map => write!(f, "map"),
            JobKind::MapReduce => write!(f, "map_reduce"),
        }
    }
}

/// Caller-side handle to a job owned by an executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub kind: JobKind,
    /// Number of tasks in the job (map tasks plus reducers)
    pub task_count: usize,
    /// Number of result slots `get_result` will return
    pub output_count: usize,
}
