//! Backend trait definitions
//!
//! Defines the ComputeBackend trait every compute platform must implement.
//! The engine core only talks to backends through this trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ActivationId, PackagedTask};

// ─────────────────────────────────────────────────────────────────
// Capabilities & Hints
// ─────────────────────────────────────────────────────────────────

/// Capabilities of a backend
#[derive(Debug, Clone)]
pub struct BackendCapabilities {
    /// Name of the backend
    pub name: &'static str,

    /// Whether `poll` distinguishes Running from Pending
    pub reports_running: bool,

    /// Whether `wait_for_change` blocks until a status change
    pub push_notifications: bool,

    /// Platform-side concurrency limit, if known
    pub max_concurrency: Option<usize>,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            name: "unknown",
            reports_running: false,
            push_notifications: false,
            max_concurrency: None,
        }
    }
}

impl BackendCapabilities {
    /// The platform limit, when `requested` activations exceed it
    pub fn concurrency_shortfall(&self, requested: usize) -> Option<usize> {
        self.max_concurrency.filter(|&limit| requested > limit)
    }
}

/// Resource hints passed along with a submission
#[derive(Debug, Clone, Default)]
pub struct ResourceHints {
    /// Memory per activation (MB)
    pub memory_mb: Option<u32>,

    /// Execution timeout per activation
    pub timeout: Option<Duration>,

    /// Attempt number, starting at 1
    pub attempt: u32,
}

// ─────────────────────────────────────────────────────────────────
// Activation Status
// ─────────────────────────────────────────────────────────────────

/// Opaque reference used to fetch an activation's result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(pub String);

/// Why an activation did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationFailure {
    /// Infrastructure faults and timeouts are transient; the task may retry
    pub transient: bool,
    pub message: String,
}

impl ActivationFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

/// Status of one activation as observed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationStatus {
    /// Accepted but not started
    Pending,
    /// Executing
    Running,
    /// Finished and a result is available
    Done(ResultRef),
    /// Finished without a result
    Failed(ActivationFailure),
}

impl ActivationStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, ActivationStatus::Done(_) | ActivationStatus::Failed(_))
    }
}

// ─────────────────────────────────────────────────────────────────
// ComputeBackend Trait
// ─────────────────────────────────────────────────────────────────

/// Core trait for compute backends
///
/// Implementations must be safe to call concurrently from many task drivers.
/// `delete` must be idempotent.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Get the backend name (e.g., "local", "process")
    fn name(&self) -> &'static str;

    /// Get the backend capabilities
    fn capabilities(&self) -> BackendCapabilities;

    /// Start one activation for a packaged task
    ///
    /// Returns `BackendUnavailable`, `QuotaExceeded` or `PayloadRejected` when
    /// the platform refuses the submission outright.
    async fn submit(&self, task: &PackagedTask, hints: &ResourceHints) -> Result<ActivationId>;

    /// Current status of an activation
    async fn poll(&self, activation: &ActivationId) -> Result<ActivationStatus>;

    /// Wait up to `max_wait` for the status to change, then report it
    ///
    /// Push-capable backends override this; the default polls once.
    async fn wait_for_change(
        &self,
        activation: &ActivationId,
        max_wait: Duration,
    ) -> Result<ActivationStatus> {
        let _ = max_wait;
        self.poll(activation).await
    }

    /// Fetch the encoded result of a finished activation
    async fn fetch_result(&self, result: &ResultRef) -> Result<Vec<u8>>;

    /// Release everything the backend holds for an activation
    async fn delete(&self, activation: &ActivationId) -> Result<()>;
}
