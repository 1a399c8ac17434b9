//! Per-slot outcomes returned to the caller

use serde::Serialize;
use serde_json::Value;

use super::TaggedError;
use crate::executor::TaskState;

/// Resolution of one result slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Function returned a value
    Value { value: Value },
    /// Function raised; the task itself succeeded
    UserError { error: TaggedError },
    /// Engine gave up on the task
    Failed { state: TaskState, message: String },
    /// Reducer never ran because one of its inputs failed
    DependencyFailed { dependency: usize, message: String },
    /// Not terminal yet
    Pending,
}

impl TaskOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Value { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, TaskOutcome::Value { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TaskOutcome::Pending)
    }

    /// Engine-level failure (not a user exception)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Failed { .. } | TaskOutcome::DependencyFailed { .. }
        )
    }

    /// Describe a non-value outcome
    pub fn error_message(&self) -> Option<String> {
        match self {
            TaskOutcome::Value { .. } => None,
            TaskOutcome::UserError { error } => Some(error.to_string()),
            TaskOutcome::Failed { state, message } => Some(format!("{}: {}", state, message)),
            TaskOutcome::DependencyFailed { dependency, message } => {
                Some(format!("dependency {} failed: {}", dependency, message))
            }
            TaskOutcome::Pending => Some("not finished".to_string()),
        }
    }

    /// Representation used inside reducer input
    pub fn to_reducer_input(&self) -> Value {
        match self {
            TaskOutcome::Value { value } => value.clone(),
            TaskOutcome::UserError { error } => error.to_value(),
            TaskOutcome::Failed { state, message } => {
                TaggedError::new(state.as_str(), message.clone()).to_value()
            }
            TaskOutcome::DependencyFailed { message, .. } => {
                TaggedError::new("dependency", message.clone()).to_value()
            }
            TaskOutcome::Pending => TaggedError::new("pending", "not finished").to_value(),
        }
    }
}
