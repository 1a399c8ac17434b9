//! Local backend
//!
//! Runs activations on the blocking thread pool of the current Tokio runtime.
//! Status changes are pushed through a watch channel, so monitors do not
//! need to poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::function::FunctionCatalog;
use crate::handler;
use crate::types::{ActivationId, PackagedTask};

use super::{
    ActivationFailure, ActivationStatus, BackendCapabilities, ComputeBackend, ResourceHints,
    ResultRef,
};

struct LocalActivation {
    status: watch::Receiver<ActivationStatus>,
    handle: JoinHandle<()>,
}

/// Backend that executes tasks on local worker threads
pub struct LocalBackend {
    catalog: Arc<FunctionCatalog>,
    workers: Arc<Semaphore>,
    worker_count: usize,
    activations: Mutex<HashMap<ActivationId, LocalActivation>>,
    results: Arc<Mutex<HashMap<ResultRef, Vec<u8>>>>,
}

impl LocalBackend {
    /// Create a local backend with `workers` concurrent worker threads (0 = CPU count)
    pub fn new(catalog: Arc<FunctionCatalog>, workers: usize) -> Self {
        let worker_count = if workers == 0 { num_cpus::get() } else { workers };
        Self {
            catalog,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
            activations: Mutex::new(HashMap::new()),
            results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Number of activations not yet deleted
    pub fn activation_count(&self) -> usize {
        self.activations.lock().len()
    }

    fn status_receiver(&self, activation: &ActivationId) -> Result<watch::Receiver<ActivationStatus>> {
        self.activations
            .lock()
            .get(activation)
            .map(|a| a.status.clone())
            .ok_or_else(|| Error::ActivationNotFound {
                activation: activation.to_string(),
            })
    }
}

#[async_trait]
impl ComputeBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "local",
            reports_running: true,
            push_notifications: true,
            max_concurrency: Some(self.worker_count),
        }
    }

    async fn submit(&self, task: &PackagedTask, _hints: &ResourceHints) -> Result<ActivationId> {
        let id = ActivationId::generate("local");
        let result_ref = ResultRef(id.to_string());
        let (tx, rx) = watch::channel(ActivationStatus::Pending);

        let catalog = Arc::clone(&self.catalog);
        let workers = Arc::clone(&self.workers);
        let results = Arc::clone(&self.results);
        let bytes = Arc::clone(&task.bytes);

        let handle = tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                tx.send_replace(ActivationStatus::Failed(ActivationFailure::transient(
                    "local worker pool closed",
                )));
                return;
            };
            tx.send_replace(ActivationStatus::Running);

            let run = tokio::task::spawn_blocking(move || handler::execute_payload(&catalog, &bytes));
            match run.await {
                Ok(output) => {
                    results.lock().insert(result_ref.clone(), output);
                    tx.send_replace(ActivationStatus::Done(result_ref));
                }
                Err(e) => {
                    tx.send_replace(ActivationStatus::Failed(ActivationFailure::transient(
                        format!("local worker thread failed: {}", e),
                    )));
                }
            }
        });

        tracing::trace!(activation = %id, task = task.index, "Local activation started");
        self.activations.lock().insert(
            id.clone(),
            LocalActivation { status: rx, handle },
        );
        Ok(id)
    }

    async fn poll(&self, activation: &ActivationId) -> Result<ActivationStatus> {
        let status = self.status_receiver(activation)?.borrow().clone();
        Ok(status)
    }

    async fn wait_for_change(
        &self,
        activation: &ActivationId,
        max_wait: Duration,
    ) -> Result<ActivationStatus> {
        let mut rx = self.status_receiver(activation)?;
        let current = rx.borrow_and_update().clone();
        if current.is_settled() {
            return Ok(current);
        }
        // A closed channel means the worker finished; report whatever it left
        let _ = tokio::time::timeout(max_wait, rx.changed()).await;
        let status = rx.borrow().clone();
        Ok(status)
    }

    async fn fetch_result(&self, result: &ResultRef) -> Result<Vec<u8>> {
        self.results
            .lock()
            .get(result)
            .cloned()
            .ok_or_else(|| Error::ActivationNotFound {
                activation: result.0.clone(),
            })
    }

    async fn delete(&self, activation: &ActivationId) -> Result<()> {
        if let Some(entry) = self.activations.lock().remove(activation) {
            entry.handle.abort();
        }
        self.results.lock().remove(&ResultRef(activation.to_string()));
        Ok(())
    }
}
