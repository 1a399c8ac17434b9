//! Invocation dispatcher
//!
//! Bounds the number of tasks in flight across every job of an executor.
//! Tasks beyond the limit wait for a slot in FIFO order; a task keeps its
//! slot until it settles or gives it back to retry.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::{ComputeBackend, ResourceHints};
use crate::error::{Error, Result};
use crate::types::{ActivationId, PackagedTask};

use super::ExecutorState;

/// Permission to have one activation in flight
#[derive(Debug)]
pub struct DispatchSlot {
    _permit: OwnedSemaphorePermit,
    state: Arc<ExecutorState>,
}

impl Drop for DispatchSlot {
    fn drop(&mut self) {
        self.state.leave_flight();
    }
}

/// Submits tasks to the backend under a concurrency limit
pub struct InvocationDispatcher {
    backend: Arc<dyn ComputeBackend>,
    state: Arc<ExecutorState>,
    slots: Arc<Semaphore>,
    memory_mb: Option<u32>,
}

impl InvocationDispatcher {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        state: Arc<ExecutorState>,
        max_in_flight: usize,
        memory_mb: Option<u32>,
    ) -> Self {
        Self {
            backend,
            state,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            memory_mb,
        }
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<DispatchSlot> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("dispatcher has shut down".to_string()))?;
        self.state.enter_flight();
        Ok(DispatchSlot {
            _permit: permit,
            state: Arc::clone(&self.state),
        })
    }

    /// Submit one attempt of a task while holding a slot
    pub async fn submit(
        &self,
        task: &PackagedTask,
        attempt: u32,
        _slot: &DispatchSlot,
    ) -> Result<ActivationId> {
        let hints = ResourceHints {
            memory_mb: self.memory_mb,
            timeout: task.timeout,
            attempt,
        };

        let activation = self.backend.submit(task, &hints).await?;
        tracing::debug!(
            job_id = %task.job_id,
            task = task.index,
            attempt,
            activation = %activation,
            in_flight = self.state.in_flight(),
            "Task dispatched"
        );
        Ok(activation)
    }

    /// Best-effort release of an activation
    pub async fn release(&self, activation: &ActivationId) {
        if let Err(e) = self.backend.delete(activation).await {
            tracing::warn!(activation = %activation, error = %e, "Failed to delete activation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_bounded_and_returned() {
        let state = Arc::new(ExecutorState::new());
        let dispatcher = InvocationDispatcher::new(Arc::new(MockBackend::new()), Arc::clone(&state), 2, None);

        let a = dispatcher.acquire().await.unwrap();
        let _b = dispatcher.acquire().await.unwrap();
        assert_eq!(dispatcher.available(), 0);
        assert_eq!(state.in_flight(), 2);

        let blocked = tokio::time::timeout(Duration::from_millis(20), dispatcher.acquire()).await;
        assert!(blocked.is_err());

        drop(a);
        assert_eq!(state.in_flight(), 1);
        let c = tokio::time::timeout(Duration::from_millis(200), dispatcher.acquire()).await;
        assert!(c.is_ok());
        assert_eq!(state.peak_in_flight(), 2);
    }
}
