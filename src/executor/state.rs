//! Job and task state tracking
//!
//! Holds the registry of live jobs, the per-task lifecycle records and the
//! executor-wide in-flight counters.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::types::{ActivationId, JobId, JobKind, PackagedTask, TaskOutcome};

use super::{TaskEvent, TaskState, TaskStateMachine};

// ─────────────────────────────────────────────────────────────────
// Task Record
// ─────────────────────────────────────────────────────────────────

/// What a task contributes to its job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TaskRole {
    /// Runs the job function on one partition
    Map,
    /// Runs the reducer over the outcomes of `inputs` (job task indices)
    Reduce { inputs: Vec<usize> },
}

#[derive(Debug, Clone)]
struct ActivationEntry {
    id: ActivationId,
    deleted: bool,
}

#[derive(Debug)]
struct TaskSlot {
    machine: TaskStateMachine,
    payload: Option<PackagedTask>,
    activations: Vec<ActivationEntry>,
    outcome: Option<TaskOutcome>,
    queued_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Lifecycle record of one task
#[derive(Debug)]
pub struct TaskRecord {
    pub index: usize,
    pub role: TaskRole,
    slot: Mutex<TaskSlot>,
}

impl TaskRecord {
    pub fn new(index: usize, role: TaskRole, payload: Option<PackagedTask>, max_retries: u32) -> Self {
        Self {
            index,
            role,
            slot: Mutex::new(TaskSlot {
                machine: TaskStateMachine::new(max_retries),
                payload,
                activations: Vec::new(),
                outcome: None,
                queued_at: Utc::now(),
                submitted_at: None,
                started_at: None,
                finished_at: None,
            }),
        }
    }

    pub fn state(&self) -> TaskState {
        self.slot.lock().machine.state()
    }

    pub fn attempt(&self) -> u32 {
        self.slot.lock().machine.attempt()
    }

    pub fn dispatches(&self) -> u32 {
        self.slot.lock().machine.dispatches()
    }

    pub fn last_error(&self) -> Option<String> {
        self.slot.lock().machine.last_error().map(str::to_string)
    }

    /// Apply a lifecycle event, stamping the matching timestamp
    pub fn apply(&self, event: TaskEvent) -> Result<TaskState> {
        let mut slot = self.slot.lock();
        let state = slot.machine.apply(event)?;
        let now = Utc::now();
        match state {
            TaskState::Dispatched => slot.submitted_at = Some(now),
            TaskState::Running => {
                slot.started_at.get_or_insert(now);
            }
            s if s.is_terminal() => slot.finished_at = Some(now),
            _ => {}
        }
        Ok(state)
    }

    pub fn set_payload(&self, payload: PackagedTask) {
        self.slot.lock().payload = Some(payload);
    }

    /// Remember an activation so clean() can release it
    pub fn record_activation(&self, id: ActivationId) {
        self.slot.lock().activations.push(ActivationEntry { id, deleted: false });
    }

    /// Claim an activation for deletion; false if it was already claimed
    pub fn claim_for_delete(&self, id: &ActivationId) -> bool {
        let mut slot = self.slot.lock();
        match slot.activations.iter_mut().find(|a| &a.id == id) {
            Some(entry) if !entry.deleted => {
                entry.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Claim every activation not deleted yet
    pub fn claim_all_for_delete(&self) -> Vec<ActivationId> {
        let mut slot = self.slot.lock();
        slot.activations
            .iter_mut()
            .filter(|a| !a.deleted)
            .map(|a| {
                a.deleted = true;
                a.id.clone()
            })
            .collect()
    }

    pub fn activations(&self) -> Vec<ActivationId> {
        self.slot.lock().activations.iter().map(|a| a.id.clone()).collect()
    }

    pub fn set_outcome(&self, outcome: TaskOutcome) {
        self.slot.lock().outcome = Some(outcome);
    }

    /// Recorded outcome, `Pending` until one is recorded
    pub fn outcome(&self) -> TaskOutcome {
        self.slot.lock().outcome.clone().unwrap_or(TaskOutcome::Pending)
    }

    /// Whether an outcome has been recorded
    pub fn has_outcome(&self) -> bool {
        self.slot.lock().outcome.is_some()
    }

    pub fn status(&self) -> TaskStatus {
        let slot = self.slot.lock();
        TaskStatus {
            index: self.index,
            role: self.role.clone(),
            state: slot.machine.state(),
            attempts: slot.machine.dispatches(),
            retries: slot.machine.retries(),
            activation: slot.activations.last().map(|a| a.id.clone()),
            last_error: slot.machine.last_error().map(str::to_string),
            payload_bytes: slot.payload.as_ref().map(PackagedTask::size),
            queued_at: slot.queued_at,
            submitted_at: slot.submitted_at,
            started_at: slot.started_at,
            finished_at: slot.finished_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Job Record
// ─────────────────────────────────────────────────────────────────

/// Everything the executor tracks for one job
#[derive(Debug)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub function: String,
    pub reducer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tasks: Vec<Arc<TaskRecord>>,
    /// Task indices whose outcomes make up the job result, in result order
    pub outputs: Vec<usize>,
    /// Reducers run even when an input failed
    pub partial_results: bool,
    terminal: watch::Sender<usize>,
    cancel: watch::Sender<bool>,
    partial: AtomicBool,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl JobRecord {
    pub fn new(
        id: JobId,
        kind: JobKind,
        function: String,
        reducer: Option<String>,
        tasks: Vec<Arc<TaskRecord>>,
        outputs: Vec<usize>,
        partial_results: bool,
    ) -> Self {
        let (terminal, _) = watch::channel(0);
        let (cancel, _) = watch::channel(false);
        Self {
            id,
            kind,
            function,
            reducer,
            created_at: Utc::now(),
            tasks,
            outputs,
            partial_results,
            terminal,
            cancel,
            partial: AtomicBool::new(false),
            finished_at: Mutex::new(None),
        }
    }

    pub fn task(&self, index: usize) -> Result<&Arc<TaskRecord>> {
        self.tasks
            .get(index)
            .ok_or_else(|| Error::Internal(format!("job {} has no task {}", self.id, index)))
    }

    /// Number of tasks in a terminal state
    pub fn terminal_count(&self) -> usize {
        *self.terminal.borrow()
    }

    pub fn is_complete(&self) -> bool {
        self.terminal_count() >= self.tasks.len()
    }

    /// Record that one more task reached a terminal state
    pub fn mark_terminal(&self) {
        let total = self.tasks.len();
        let mut complete = false;
        self.terminal.send_modify(|count| {
            *count += 1;
            complete = *count >= total;
        });
        if complete {
            *self.finished_at.lock() = Some(Utc::now());
        }
    }

    /// Receiver that changes every time a task settles
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.terminal.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Flag the job as having been given up on while tasks were pending
    pub fn mark_partial(&self) {
        self.partial.store(true, Ordering::SeqCst);
    }

    pub fn is_partial(&self) -> bool {
        self.partial.load(Ordering::SeqCst) && !self.is_complete()
    }

    /// Indices of terminal and non-terminal tasks
    pub fn split_done(&self) -> (Vec<usize>, Vec<usize>) {
        self.tasks
            .iter()
            .map(|t| (t.index, t.state().is_terminal()))
            .fold((Vec::new(), Vec::new()), |(mut done, mut not_done), (i, terminal)| {
                if terminal {
                    done.push(i);
                } else {
                    not_done.push(i);
                }
                (done, not_done)
            })
    }

    pub fn status(&self) -> JobStatus {
        let tasks: Vec<TaskStatus> = self.tasks.iter().map(|t| t.status()).collect();
        let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
        for task in &tasks {
            *by_state.entry(task.state.to_string()).or_default() += 1;
        }
        let data_bytes = tasks.iter().filter_map(|t| t.payload_bytes).sum();
        JobStatus {
            job_id: self.id.clone(),
            kind: self.kind,
            function: self.function.clone(),
            reducer: self.reducer.clone(),
            created_at: self.created_at,
            finished_at: *self.finished_at.lock(),
            total: tasks.len(),
            terminal: self.terminal_count(),
            partial: self.is_partial(),
            data_bytes,
            by_state,
            tasks,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Status Snapshots
// ─────────────────────────────────────────────────────────────────

/// Point-in-time view of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub index: usize,
    #[serde(flatten)]
    pub role: TaskRole,
    pub state: TaskState,
    /// Accepted submissions so far
    pub attempts: u32,
    pub retries: u32,
    pub activation: Option<ActivationId>,
    pub last_error: Option<String>,
    /// Encoded payload size; unset for reducers that have not run
    pub payload_bytes: Option<usize>,
    pub queued_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Point-in-time view of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub kind: JobKind,
    pub function: String,
    pub reducer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub terminal: usize,
    /// A wait gave up while tasks were still pending
    pub partial: bool,
    /// Total encoded payload bytes of packaged tasks
    pub data_bytes: usize,
    pub by_state: BTreeMap<String, usize>,
    pub tasks: Vec<TaskStatus>,
}

impl JobStatus {
    pub fn count(&self, state: TaskState) -> usize {
        self.by_state.get(state.as_str()).copied().unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Executor State
// ─────────────────────────────────────────────────────────────────

/// Registry of live jobs plus executor-wide counters
#[derive(Debug, Default)]
pub struct ExecutorState {
    jobs: RwLock<HashMap<JobId, Arc<JobRecord>>>,
    cleaned: RwLock<HashSet<JobId>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ExecutorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Arc<JobRecord>) {
        self.jobs.write().insert(job.id.clone(), job);
    }

    /// Look up a live job
    pub fn job(&self, id: &JobId) -> Result<Arc<JobRecord>> {
        if let Some(job) = self.jobs.read().get(id) {
            return Ok(Arc::clone(job));
        }
        if self.cleaned.read().contains(id) {
            Err(Error::JobCleaned {
                job_id: id.to_string(),
            })
        } else {
            Err(Error::JobNotFound {
                job_id: id.to_string(),
            })
        }
    }

    /// Remove a job and remember it was cleaned
    pub fn take(&self, id: &JobId) -> Option<Arc<JobRecord>> {
        let job = self.jobs.write().remove(id);
        if job.is_some() {
            self.cleaned.write().insert(id.clone());
        }
        job
    }

    /// Ids of live jobs, oldest first
    pub fn job_ids(&self) -> Vec<JobId> {
        let jobs = self.jobs.read();
        let mut ids: Vec<_> = jobs.values().map(|j| (j.created_at, j.id.clone())).collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub fn enter_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub fn leave_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Tasks currently holding a dispatch slot
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count seen
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
