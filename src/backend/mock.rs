//! Mock backend for testing
//!
//! Simulates a remote compute platform in memory: activations complete after
//! a configurable latency, and individual tasks can be told to fail, hang or
//! be rejected. Every interaction is recorded for verification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::function::FunctionCatalog;
use crate::handler;
use crate::types::{ActivationId, PackagedTask};

use super::{
    ActivationFailure, ActivationStatus, BackendCapabilities, ComputeBackend, ResourceHints,
    ResultRef,
};

// ─────────────────────────────────────────────────────────────────
// Mock Backend Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for mock backend behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Latency of every activation unless overridden per task
    pub latency: Duration,

    /// Whether polls distinguish Running from Pending
    pub reports_running: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(5),
            reports_running: true,
        }
    }
}

/// How the platform refuses a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRejection {
    Unavailable,
    Quota,
    Payload,
}

/// Behavior of one task index
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Latency override for this task
    pub latency: Option<Duration>,

    /// Fail this many attempts with an infrastructure fault before succeeding
    pub transient_failures: u32,

    /// Fail this many submissions with a transport error before accepting
    pub submit_errors: u32,

    /// Refuse every submission
    pub reject: Option<MockRejection>,

    /// Never settle
    pub hang: bool,

    /// Report the activation as failed for good
    pub permanent_failure: bool,
}

// ─────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────

enum MockOutcome {
    Result(Vec<u8>),
    Failure(ActivationFailure),
}

struct MockActivation {
    index: usize,
    ready_at: Option<Instant>,
    outcome: MockOutcome,
    deleted: bool,
}

impl MockActivation {
    fn is_active(&self, now: Instant) -> bool {
        !self.deleted && self.ready_at.map_or(true, |t| now < t)
    }
}

/// Track interactions for verification
#[derive(Debug, Default)]
struct CallCounts {
    submits: HashMap<usize, u32>,
    rejected: u32,
    deletes: HashMap<ActivationId, u32>,
    max_active: usize,
}

/// In-memory implementation of ComputeBackend for testing
pub struct MockBackend {
    config: MockConfig,
    catalog: Arc<FunctionCatalog>,
    behaviors: RwLock<HashMap<usize, MockBehavior>>,
    activations: Mutex<HashMap<ActivationId, MockActivation>>,
    call_counts: Mutex<CallCounts>,
}

impl MockBackend {
    /// Create a mock backend running the builtin functions
    pub fn new() -> Self {
        Self::with_config(MockConfig::default(), Arc::new(FunctionCatalog::with_builtins()))
    }

    /// Create a mock backend with custom configuration
    pub fn with_config(config: MockConfig, catalog: Arc<FunctionCatalog>) -> Self {
        Self {
            config,
            catalog,
            behaviors: RwLock::new(HashMap::new()),
            activations: Mutex::new(HashMap::new()),
            call_counts: Mutex::new(CallCounts::default()),
        }
    }

    /// Set the behavior of the task at `index` (in every job)
    pub fn set_behavior(&self, index: usize, behavior: MockBehavior) {
        self.behaviors.write().insert(index, behavior);
    }

    /// Set only the latency of the task at `index`
    pub fn set_latency(&self, index: usize, latency: Duration) {
        self.behaviors.write().entry(index).or_default().latency = Some(latency);
    }

    /// Number of accepted or refused submissions for a task index
    pub fn submissions(&self, index: usize) -> u32 {
        self.call_counts.lock().submits.get(&index).copied().unwrap_or(0)
    }

    /// Total submissions across all tasks
    pub fn total_submissions(&self) -> u32 {
        self.call_counts.lock().submits.values().sum()
    }

    /// Submissions refused with a rejection
    pub fn rejections(&self) -> u32 {
        self.call_counts.lock().rejected
    }

    /// Number of delete calls for one activation
    pub fn delete_calls(&self, activation: &ActivationId) -> u32 {
        self.call_counts.lock().deletes.get(activation).copied().unwrap_or(0)
    }

    /// Delete calls per activation
    pub fn delete_counts(&self) -> HashMap<ActivationId, u32> {
        self.call_counts.lock().deletes.clone()
    }

    /// Highest number of simultaneously active activations seen
    pub fn max_active(&self) -> usize {
        self.call_counts.lock().max_active
    }

    /// Activations currently running and not deleted
    pub fn active(&self) -> usize {
        let now = Instant::now();
        self.activations
            .lock()
            .values()
            .filter(|a| a.is_active(now))
            .count()
    }

    /// Every activation id ever accepted
    pub fn activation_ids(&self) -> Vec<ActivationId> {
        self.activations.lock().keys().cloned().collect()
    }

    /// Activations not yet deleted
    pub fn live_activations(&self) -> usize {
        self.activations.lock().values().filter(|a| !a.deleted).count()
    }

    fn behavior(&self, index: usize) -> MockBehavior {
        self.behaviors.read().get(&index).cloned().unwrap_or_default()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "mock",
            reports_running: self.config.reports_running,
            push_notifications: false,
            max_concurrency: None,
        }
    }

    async fn submit(&self, task: &PackagedTask, _hints: &ResourceHints) -> Result<ActivationId> {
        let index = task.index;
        let behavior = self.behavior(index);

        let attempt = {
            let mut counts = self.call_counts.lock();
            let submits = counts.submits.entry(index).or_insert(0);
            *submits += 1;
            *submits
        };

        if let Some(rejection) = behavior.reject {
            self.call_counts.lock().rejected += 1;
            return Err(match rejection {
                MockRejection::Unavailable => Error::backend_unavailable("mock", "platform is down"),
                MockRejection::Quota => Error::quota_exceeded("mock", "concurrent activation quota reached"),
                MockRejection::Payload => Error::PayloadRejected {
                    backend: "mock".to_string(),
                    message: format!("payload of {} bytes refused", task.size()),
                },
            });
        }
        if attempt <= behavior.submit_errors {
            return Err(Error::transport(format!(
                "connection reset submitting task {} (attempt {})",
                index, attempt
            )));
        }

        let execution_attempt = attempt - behavior.submit_errors;
        let outcome = if behavior.permanent_failure {
            MockOutcome::Failure(ActivationFailure::permanent("activation rejected by runtime"))
        } else if execution_attempt <= behavior.transient_failures {
            MockOutcome::Failure(ActivationFailure::transient(format!(
                "worker node lost (attempt {})",
                execution_attempt
            )))
        } else {
            MockOutcome::Result(handler::execute_payload(&self.catalog, &task.bytes))
        };

        let now = Instant::now();
        let latency = behavior.latency.unwrap_or(self.config.latency);
        let ready_at = if behavior.hang { None } else { Some(now + latency) };
        let id = ActivationId::generate("mock");

        let mut activations = self.activations.lock();
        let active = activations.values().filter(|a| a.is_active(now)).count() + 1;
        activations.insert(
            id.clone(),
            MockActivation {
                index,
                ready_at,
                outcome,
                deleted: false,
            },
        );
        drop(activations);

        let mut counts = self.call_counts.lock();
        counts.max_active = counts.max_active.max(active);
        Ok(id)
    }

    async fn poll(&self, activation: &ActivationId) -> Result<ActivationStatus> {
        let activations = self.activations.lock();
        let entry = activations
            .get(activation)
            .filter(|a| !a.deleted)
            .ok_or_else(|| Error::ActivationNotFound {
                activation: activation.to_string(),
            })?;

        let now = Instant::now();
        let status = match entry.ready_at {
            Some(ready_at) if now >= ready_at => match &entry.outcome {
                MockOutcome::Result(_) => ActivationStatus::Done(ResultRef(activation.to_string())),
                MockOutcome::Failure(failure) => ActivationStatus::Failed(failure.clone()),
            },
            _ if self.config.reports_running => ActivationStatus::Running,
            _ => ActivationStatus::Pending,
        };
        tracing::trace!(activation = %activation, task = entry.index, ?status, "Mock poll");
        Ok(status)
    }

    async fn fetch_result(&self, result: &ResultRef) -> Result<Vec<u8>> {
        let activations = self.activations.lock();
        match activations.get(&ActivationId::new(result.0.clone())) {
            Some(MockActivation {
                outcome: MockOutcome::Result(bytes),
                deleted: false,
                ..
            }) => Ok(bytes.clone()),
            _ => Err(Error::ActivationNotFound {
                activation: result.0.clone(),
            }),
        }
    }

    async fn delete(&self, activation: &ActivationId) -> Result<()> {
        *self
            .call_counts
            .lock()
            .deletes
            .entry(activation.clone())
            .or_insert(0) += 1;
        if let Some(entry) = self.activations.lock().get_mut(activation) {
            entry.deleted = true;
        }
        Ok(())
    }
}
