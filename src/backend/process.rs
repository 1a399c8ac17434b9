//! Process backend
//!
//! Each activation is a child process that reads one payload on stdin and
//! writes one result on stdout (`fanout handler` by default). Aborting an
//! activation kills its process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::types::{ActivationId, PackagedTask};

use super::{
    ActivationFailure, ActivationStatus, BackendCapabilities, ComputeBackend, ResourceHints,
    ResultRef,
};

/// Longest stderr excerpt kept in a failure message
const STDERR_EXCERPT: usize = 512;

struct ProcessActivation {
    status: watch::Receiver<ActivationStatus>,
    handle: JoinHandle<()>,
}

/// Backend that runs every activation as a separate worker process
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    activations: Mutex<HashMap<ActivationId, ProcessActivation>>,
    results: Arc<Mutex<HashMap<ResultRef, Vec<u8>>>>,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            activations: Mutex::new(HashMap::new()),
            results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Worker command pointing at the running executable's `handler` subcommand
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            Error::backend_unavailable("process", format!("cannot locate current executable: {}", e))
        })?;
        Ok(Self::new(program, vec!["handler".to_string()]))
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
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

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl ComputeBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "process",
            reports_running: true,
            push_notifications: true,
            max_concurrency: None,
        }
    }

    async fn submit(&self, task: &PackagedTask, _hints: &ResourceHints) -> Result<ActivationId> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    Error::backend_unavailable(
                        "process",
                        format!("cannot start '{}': {}", self.program.display(), e),
                    )
                }
                _ => Error::transport(format!("spawning worker process failed: {}", e)),
            })?;

        let id = ActivationId::generate("proc");
        let result_ref = ResultRef(id.to_string());
        let (tx, rx) = watch::channel(ActivationStatus::Running);
        let results = Arc::clone(&self.results);
        let bytes = Arc::clone(&task.bytes);
        let stdin = child.stdin.take();

        let handle = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // A worker that exits early closes its stdin; the exit status tells the rest
                if let Err(e) = stdin.write_all(&bytes).await {
                    tracing::debug!(error = %e, "Writing payload to worker failed");
                }
            }

            let status = match child.wait_with_output().await {
                Ok(output) if output.status.success() => {
                    results.lock().insert(result_ref.clone(), output.stdout);
                    ActivationStatus::Done(result_ref)
                }
                Ok(output) => ActivationStatus::Failed(ActivationFailure::transient(format!(
                    "worker exited with {}: {}",
                    output.status,
                    excerpt(&output.stderr)
                ))),
                Err(e) => ActivationStatus::Failed(ActivationFailure::transient(format!(
                    "waiting for worker failed: {}",
                    e
                ))),
            };
            tx.send_replace(status);
        });

        tracing::trace!(activation = %id, task = task.index, "Worker process started");
        self.activations.lock().insert(
            id.clone(),
            ProcessActivation { status: rx, handle },
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
            // Dropping the child inside the aborted task kills the process
            entry.handle.abort();
        }
        self.results.lock().remove(&ResultRef(activation.to_string()));
        Ok(())
    }
}
