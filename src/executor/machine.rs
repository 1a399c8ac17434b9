//! Task lifecycle state machine
//!
//! ```text
//! QUEUED ──► DISPATCHED ──► RUNNING ──► SUCCEEDED
//!   │  ▲          │            │
//!   │  │          ├────────────┴──► FAILED_RUNTIME | TIMED_OUT   (budget spent)
//!   │  └─ RETRYING ◄──────────────┘                           (transient fault)
//!   └──► FAILED_DISPATCH                                      (submission refused)
//! ```
//!
//! Terminal states never change again; events arriving after a task settled
//! are rejected and the caller ignores them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};

/// State of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for a dispatch slot
    Queued,
    /// Submitted; the backend has not reported it running yet
    Dispatched,
    /// Executing on a worker
    Running,
    /// Transient fault; waiting for a slot to resubmit the same payload
    Retrying,
    /// A result was produced (possibly a user exception)
    Succeeded,
    /// Retry budget exhausted or a permanent runtime fault
    FailedRuntime,
    /// The backend refused the submission
    FailedDispatch,
    /// Retry budget exhausted on execution timeouts
    TimedOut,
    /// Job cleaned before the task settled
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded
                | TaskState::FailedRuntime
                | TaskState::FailedDispatch
                | TaskState::TimedOut
                | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Dispatched => "dispatched",
            TaskState::Running => "running",
            TaskState::Retrying => "retrying",
            TaskState::Succeeded => "succeeded",
            TaskState::FailedRuntime => "failed_runtime",
            TaskState::FailedDispatch => "failed_dispatch",
            TaskState::TimedOut => "timed_out",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Queued
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something observed about a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    /// Backend accepted a submission
    Dispatched,
    /// Backend reported (or grace period implied) execution started
    Started,
    /// A result was fetched
    Completed,
    /// Backend refused the submission (not retried)
    DispatchRejected { message: String },
    /// Infrastructure fault, transport error or execution timeout
    Transient { message: String, timed_out: bool },
    /// Fault that retrying cannot fix
    Permanent { message: String },
    /// Task will never be dispatched (e.g. a reducer whose input failed)
    Abandoned { message: String },
    /// Job was cleaned
    Cancel,
}

impl TaskEvent {
    fn name(&self) -> &'static str {
        match self {
            TaskEvent::Dispatched => "dispatched",
            TaskEvent::Started => "started",
            TaskEvent::Completed => "completed",
            TaskEvent::DispatchRejected { .. } => "dispatch_rejected",
            TaskEvent::Transient { .. } => "transient",
            TaskEvent::Permanent { .. } => "permanent",
            TaskEvent::Abandoned { .. } => "abandoned",
            TaskEvent::Cancel => "cancel",
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

/// Lifecycle of one task under a retry budget
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    state: TaskState,
    max_retries: u32,
    retries: u32,
    dispatches: u32,
    last_error: Option<String>,
    history: Vec<Transition>,
}

impl TaskStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: TaskState::Queued,
            max_retries,
            retries: 0,
            dispatches: 0,
            last_error: None,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Retries consumed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Accepted submissions so far
    pub fn dispatches(&self) -> u32 {
        self.dispatches
    }

    /// Attempt number of the next or current submission, starting at 1
    pub fn attempt(&self) -> u32 {
        self.retries + 1
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Apply an event and return the new state
    pub fn apply(&mut self, event: TaskEvent) -> Result<TaskState> {
        use TaskState::*;

        if self.state.is_terminal() {
            return Err(self.invalid(&event));
        }

        let next = match (self.state, &event) {
            (_, TaskEvent::Cancel) => Cancelled,
            (Queued | Retrying, TaskEvent::Dispatched) => {
                self.dispatches += 1;
                Dispatched
            }
            (Queued | Retrying, TaskEvent::DispatchRejected { message })
            | (Queued | Retrying, TaskEvent::Abandoned { message }) => {
                self.last_error = Some(message.clone());
                FailedDispatch
            }
            (Dispatched | Running, TaskEvent::Started) => Running,
            (Dispatched | Running, TaskEvent::Completed) => Succeeded,
            (
                Queued | Retrying | Dispatched | Running,
                TaskEvent::Transient { message, timed_out },
            ) => {
                self.last_error = Some(message.clone());
                if self.retries < self.max_retries {
                    self.retries += 1;
                    Retrying
                } else if *timed_out {
                    TimedOut
                } else {
                    FailedRuntime
                }
            }
            (Dispatched | Running, TaskEvent::Permanent { message }) => {
                self.last_error = Some(message.clone());
                FailedRuntime
            }
            _ => return Err(self.invalid(&event)),
        };

        if next != self.state {
            self.history.push(Transition {
                from: self.state,
                to: next,
                at: Utc::now(),
            });
            self.state = next;
        }
        Ok(next)
    }

    fn invalid(&self, event: &TaskEvent) -> Error {
        Error::Internal(format!(
            "event '{}' is not valid in state {}",
            event.name(),
            self.state
        ))
    }
}
