//! Job monitor
//!
//! Watches one activation until it settles and turns what the backend
//! reports into a resolution for the task state machine. Pull-based
//! backends are polled with exponential backoff; push-capable backends are
//! waited on directly.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio::time::Instant;

use crate::backend::{ActivationStatus, ComputeBackend, ResultRef};
use crate::error::Error;
use crate::types::{ActivationId, TaskOutcome, TaskResult};

use super::{TaskEvent, TaskRecord};

/// Consecutive poll errors tolerated before the attempt counts as failed
const MAX_POLL_ERRORS: u32 = 3;

/// How an activation ended
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A result was fetched (a value or a user exception)
    Completed(TaskOutcome),
    /// Retryable fault; `live` when the activation may still be running remotely
    Transient {
        message: String,
        timed_out: bool,
        live: bool,
    },
    /// Fault retrying cannot fix
    Permanent { message: String },
}

/// Polling behavior
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_initial_interval: Duration,
    pub poll_max_interval: Duration,
    /// Pending this long on a backend that never reports Running counts as Running
    pub running_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_initial_interval: Duration::from_millis(50),
            poll_max_interval: Duration::from_secs(2),
            running_grace: Duration::from_secs(1),
        }
    }
}

/// Tracks activations through to a resolution
pub struct JobMonitor {
    backend: Arc<dyn ComputeBackend>,
    config: MonitorConfig,
}

impl JobMonitor {
    pub fn new(backend: Arc<dyn ComputeBackend>, config: MonitorConfig) -> Self {
        Self { backend, config }
    }

    fn poll_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.poll_initial_interval,
            max_interval: self.config.poll_max_interval,
            randomization_factor: 0.1,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Watch `activation` of `task` until it settles or `timeout` elapses
    pub async fn watch(
        &self,
        task: &TaskRecord,
        activation: &ActivationId,
        timeout: Option<Duration>,
    ) -> Resolution {
        let capabilities = self.backend.capabilities();
        let submitted = Instant::now();
        let deadline = timeout.map(|t| submitted + t);
        let mut backoff = self.poll_backoff();
        let mut running = false;
        let mut poll_errors = 0;

        loop {
            let mut interval = backoff
                .next_backoff()
                .unwrap_or(self.config.poll_max_interval);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Resolution::Transient {
                        message: format!(
                            "activation {} exceeded its {}ms execution timeout",
                            activation,
                            timeout.map(|t| t.as_millis()).unwrap_or_default()
                        ),
                        timed_out: true,
                        live: true,
                    };
                }
                interval = interval.min(deadline - now);
            }

            let status = if capabilities.push_notifications {
                self.backend.wait_for_change(activation, interval).await
            } else {
                self.backend.poll(activation).await
            };

            match status {
                Ok(ActivationStatus::Done(result)) => return self.collect(activation, &result).await,
                Ok(ActivationStatus::Failed(failure)) if failure.transient => {
                    return Resolution::Transient {
                        message: failure.message,
                        timed_out: false,
                        live: false,
                    }
                }
                Ok(ActivationStatus::Failed(failure)) => {
                    return Resolution::Permanent {
                        message: failure.message,
                    }
                }
                Ok(ActivationStatus::Running) => {
                    poll_errors = 0;
                    if !running {
                        running = true;
                        let _ = task.apply(TaskEvent::Started);
                    }
                }
                Ok(ActivationStatus::Pending) => {
                    poll_errors = 0;
                    if !running
                        && !capabilities.reports_running
                        && submitted.elapsed() >= self.config.running_grace
                    {
                        running = true;
                        let _ = task.apply(TaskEvent::Started);
                    }
                }
                Err(Error::ActivationNotFound { .. }) => {
                    return Resolution::Transient {
                        message: format!("backend lost activation {}", activation),
                        timed_out: false,
                        live: false,
                    }
                }
                Err(e) if e.is_retryable() => {
                    poll_errors += 1;
                    tracing::debug!(activation = %activation, error = %e, poll_errors, "Poll failed");
                    if poll_errors >= MAX_POLL_ERRORS {
                        return Resolution::Transient {
                            message: format!("polling failed {} times: {}", poll_errors, e),
                            timed_out: false,
                            live: true,
                        };
                    }
                }
                Err(e) => {
                    return Resolution::Permanent {
                        message: e.to_string(),
                    }
                }
            }

            if !capabilities.push_notifications {
                tokio::time::sleep(interval).await;
            }
        }
    }

    async fn collect(&self, activation: &ActivationId, result: &ResultRef) -> Resolution {
        let bytes = match self.backend.fetch_result(result).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Resolution::Transient {
                    message: format!("fetching result of {} failed: {}", activation, e),
                    timed_out: false,
                    live: false,
                }
            }
        };

        match TaskResult::from_bytes(&bytes) {
            Ok(TaskResult::Ok { value }) => Resolution::Completed(TaskOutcome::Value { value }),
            Ok(TaskResult::Error { error }) => Resolution::Completed(TaskOutcome::UserError { error }),
            Err(e) => Resolution::Transient {
                message: format!("result of {} is corrupt: {}", activation, e),
                timed_out: false,
                live: false,
            },
        }
    }
}
