//! Executor façade
//!
//! Turns caller requests into jobs: partitions the input, packages one task
//! per partition, registers the job and spawns one driver per task. Drivers
//! take a dispatch slot, submit, hand the activation to the monitor and feed
//! what it reports into the task state machine until the task settles.

use std::sync::Arc;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::ComputeBackend;
use crate::error::{Error, Result};
use crate::function::FunctionCatalog;
use crate::packager::{PackageSpec, TaskPackager, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::partition::{Chunking, DiscoveryOptions, ObjectLister, Partitioner, DEFAULT_MAX_PARTITION_BYTES};
use crate::types::{
    ActivationId, JobHandle, JobId, JobKind, PackagedTask, Partition, TaskKind, TaskOutcome,
};

use super::{
    ExecutorState, InvocationDispatcher, JobMonitor, JobRecord, JobResult, JobStatus, MonitorConfig,
    ReducerInput, Resolution, ResultCollector, TaskEvent, TaskRecord, TaskRole, TaskState,
};

// ─────────────────────────────────────────────────────────────────
// Executor Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for one executor instance
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Activations in flight at once, shared by every job
    pub max_in_flight: usize,

    /// Resubmissions allowed per task after transient faults
    pub max_retries: u32,

    /// First poll interval (also the first retry delay)
    pub poll_initial_interval: Duration,

    /// Poll interval ceiling (also the retry delay ceiling)
    pub poll_max_interval: Duration,

    /// Pending this long counts as running on backends without a running signal
    pub running_grace: Duration,

    /// Execution timeout per activation
    pub task_timeout: Option<Duration>,

    /// Deadline applied by `get_result`
    pub job_timeout: Option<Duration>,

    /// Run reducers even when an input failed
    pub partial_results: bool,

    /// Largest accepted task payload
    pub max_payload_bytes: usize,

    /// Byte cap for storage partitions
    pub max_partition_bytes: u64,

    /// Memory hint passed to the backend
    pub memory_mb: Option<u32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 50,
            max_retries: 3,
            poll_initial_interval: Duration::from_millis(50),
            poll_max_interval: Duration::from_secs(2),
            running_grace: Duration::from_secs(1),
            task_timeout: None,
            job_timeout: None,
            partial_results: false,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_partition_bytes: DEFAULT_MAX_PARTITION_BYTES,
            memory_mb: None,
        }
    }
}

/// Per-job options for map jobs
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    /// How in-memory input is split into tasks
    pub chunking: Chunking,

    /// Value passed to every task alongside its partition
    pub extra_args: Option<Value>,

    /// Overrides the executor task timeout
    pub timeout: Option<Duration>,

    /// Overrides the executor partial-results policy
    pub partial_results: Option<bool>,
}

/// How map tasks are grouped under reducers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReducerGrouping {
    /// One reducer over every map task
    #[default]
    Single,
    /// One reducer per run of N consecutive map tasks
    PerChunk(usize),
    /// One reducer per source object (storage input only)
    PerObject,
}

/// Per-job options for map_reduce jobs
#[derive(Debug, Clone, Default)]
pub struct MapReduceOptions {
    pub map: MapOptions,
    pub reducer: ReducerGrouping,
    /// Value passed to every reducer alongside its inputs
    pub reducer_args: Option<Value>,
}

/// When `wait` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnWhen {
    /// Every task is terminal
    #[default]
    AllCompleted,
    /// At least one task is terminal
    AnyCompleted,
    /// Immediately, with whatever is terminal now
    Always,
}

/// Task indices split by whether they settled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WaitOutcome {
    pub done: Vec<usize>,
    pub not_done: Vec<usize>,
}

impl WaitOutcome {
    pub fn is_complete(&self) -> bool {
        self.not_done.is_empty()
    }
}

/// What `clean` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub job_id: JobId,
    /// Activations deleted by this call
    pub deleted: usize,
    /// Deletions the backend refused
    pub failed: usize,
    /// The job had been cleaned before
    pub already_clean: bool,
}

// ─────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────

/// Components shared with task drivers
struct Shared {
    state: Arc<ExecutorState>,
    dispatcher: InvocationDispatcher,
    monitor: JobMonitor,
    packager: TaskPackager,
    /// Resubmission delays; each driver works on its own copy
    retry: ExponentialBackoff,
}

/// Reducer tasks still to be dispatched
struct ReducerPlan {
    function: String,
    args: Value,
    groups: Vec<Vec<usize>>,
    timeout: Option<Duration>,
}

/// Runs jobs on one compute backend
pub struct Executor {
    id: String,
    config: ExecutorConfig,
    backend: Arc<dyn ComputeBackend>,
    partitioner: Partitioner,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl Executor {
    /// Create an executor; must be called from within a tokio runtime
    pub fn new(
        config: ExecutorConfig,
        backend: Arc<dyn ComputeBackend>,
        catalog: Arc<FunctionCatalog>,
    ) -> Result<Self> {
        if config.max_in_flight == 0 {
            return Err(Error::config_field_invalid(
                "executor.max_in_flight",
                "must be greater than 0",
            ));
        }
        if config.max_payload_bytes == 0 {
            return Err(Error::config_field_invalid(
                "packager.max_payload_bytes",
                "must be greater than 0",
            ));
        }
        let runtime = Handle::try_current()
            .map_err(|_| Error::Internal("executor must be created inside a tokio runtime".to_string()))?;
        let partitioner = Partitioner::new(config.max_partition_bytes)?;

        let state = Arc::new(ExecutorState::new());
        let dispatcher = InvocationDispatcher::new(
            Arc::clone(&backend),
            Arc::clone(&state),
            config.max_in_flight,
            config.memory_mb,
        );
        let monitor = JobMonitor::new(
            Arc::clone(&backend),
            MonitorConfig {
                poll_initial_interval: config.poll_initial_interval,
                poll_max_interval: config.poll_max_interval,
                running_grace: config.running_grace,
            },
        );
        let shared = Arc::new(Shared {
            state,
            dispatcher,
            monitor,
            packager: TaskPackager::new(catalog, config.max_payload_bytes),
            retry: ExponentialBackoff {
                initial_interval: config.poll_initial_interval,
                max_interval: config.poll_max_interval,
                multiplier: 2.0,
                randomization_factor: 0.1,
                max_elapsed_time: None,
                ..Default::default()
            },
        });

        let id = format!("fx-{}", &Uuid::new_v4().simple().to_string()[..6]);
        info!(
            executor = %id,
            backend = backend.name(),
            max_in_flight = config.max_in_flight,
            max_retries = config.max_retries,
            "Executor created"
        );
        if let Some(limit) = backend.capabilities().concurrency_shortfall(config.max_in_flight) {
            warn!(
                executor = %id,
                backend = backend.name(),
                max_in_flight = config.max_in_flight,
                limit,
                "Backend runs fewer activations at once than max_in_flight; the rest queue on the backend"
            );
        }

        Ok(Self {
            id,
            config,
            backend,
            partitioner,
            shared,
            runtime,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    // ─────────────────────────────────────────────────────────────
    // Job creation
    // ─────────────────────────────────────────────────────────────

    /// Run `function` once on `data`
    pub fn call_async<T: Serialize>(&self, function: &str, data: T) -> Result<JobHandle> {
        self.shared.packager.ensure_function(function)?;
        let data = serde_json::to_value(data).map_err(|e| Error::serialization(0, e.to_string()))?;

        let job_id = JobId::generate(&self.id);
        let args = Value::Null;
        let spec = self.spec(&job_id, TaskKind::Call, function, &args, None);
        let payload = self.shared.packager.package(&spec, 0, data)?;

        self.launch(job_id, JobKind::CallAsync, function, vec![payload], None, self.config.partial_results)
    }

    /// Run `function` on every partition of `items`
    pub fn map<T, I>(&self, function: &str, items: I, options: MapOptions) -> Result<JobHandle>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let job_id = JobId::generate(&self.id);
        let (payloads, _) = self.package_items(&job_id, function, items, &options)?;
        let partial = options.partial_results.unwrap_or(self.config.partial_results);
        self.launch(job_id, JobKind::Map, function, payloads, None, partial)
    }

    /// Map `function` over `items`, then run `reducer` over the map results
    pub fn map_reduce<T, I>(
        &self,
        function: &str,
        items: I,
        reducer: &str,
        options: MapReduceOptions,
    ) -> Result<JobHandle>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        self.shared.packager.ensure_function(reducer)?;
        let job_id = JobId::generate(&self.id);
        let (payloads, _) = self.package_items(&job_id, function, items, &options.map)?;

        let groups = match options.reducer {
            ReducerGrouping::PerObject => {
                return Err(Error::NotSupported(
                    "one reducer per object needs storage input (use map_reduce_objects)".to_string(),
                ))
            }
            grouping => reducer_groups(grouping, payloads.len(), &[])?,
        };
        let plan = ReducerPlan {
            function: reducer.to_string(),
            args: options.reducer_args.unwrap_or(Value::Null),
            groups,
            timeout: options.map.timeout.or(self.config.task_timeout),
        };
        let partial = options.map.partial_results.unwrap_or(self.config.partial_results);
        self.launch(job_id, JobKind::MapReduce, function, payloads, Some(plan), partial)
    }

    /// Run `function` on every storage partition under `prefix`
    pub async fn map_objects(
        &self,
        function: &str,
        lister: &dyn ObjectLister,
        prefix: &str,
        discovery: DiscoveryOptions,
        options: MapOptions,
    ) -> Result<JobHandle> {
        self.shared.packager.ensure_function(function)?;
        let discovered = self.partitioner.discover(lister, prefix, &discovery).await?;
        let job_id = JobId::generate(&self.id);
        let payloads = self.package_partitions(&job_id, function, &discovered.partitions, &options)?;
        info!(
            job_id = %job_id,
            objects = discovered.objects.len(),
            bytes = discovered.total_bytes(),
            partitions = discovered.partitions.len(),
            "Discovered storage partitions"
        );

        let partial = options.partial_results.unwrap_or(self.config.partial_results);
        self.launch(job_id, JobKind::Map, function, payloads, None, partial)
    }

    /// Map over storage partitions under `prefix`, then reduce
    pub async fn map_reduce_objects(
        &self,
        function: &str,
        lister: &dyn ObjectLister,
        prefix: &str,
        mut discovery: DiscoveryOptions,
        reducer: &str,
        options: MapReduceOptions,
    ) -> Result<JobHandle> {
        self.shared.packager.ensure_function(function)?;
        self.shared.packager.ensure_function(reducer)?;
        if options.reducer == ReducerGrouping::PerObject {
            discovery.pack_objects = false;
        }

        let discovered = self.partitioner.discover(lister, prefix, &discovery).await?;
        let job_id = JobId::generate(&self.id);
        let payloads = self.package_partitions(&job_id, function, &discovered.partitions, &options.map)?;

        let per_object: Vec<usize> = discovered
            .parts_per_object()
            .into_iter()
            .map(|(_, count)| count)
            .collect();
        let plan = ReducerPlan {
            function: reducer.to_string(),
            args: options.reducer_args.unwrap_or(Value::Null),
            groups: reducer_groups(options.reducer, payloads.len(), &per_object)?,
            timeout: options.map.timeout.or(self.config.task_timeout),
        };
        let partial = options.map.partial_results.unwrap_or(self.config.partial_results);
        self.launch(job_id, JobKind::MapReduce, function, payloads, Some(plan), partial)
    }

    fn spec<'a>(
        &self,
        job_id: &'a JobId,
        kind: TaskKind,
        function: &'a str,
        args: &'a Value,
        timeout: Option<Duration>,
    ) -> PackageSpec<'a> {
        PackageSpec {
            job_id: job_id.as_str(),
            kind,
            function,
            args,
            timeout: timeout.or(self.config.task_timeout),
        }
    }

    fn package_items<T, I>(
        &self,
        job_id: &JobId,
        function: &str,
        items: I,
        options: &MapOptions,
    ) -> Result<(Vec<PackagedTask>, Vec<Partition>)>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        self.shared.packager.ensure_function(function)?;
        let values = TaskPackager::encode_items(items)?;
        let partitions = self.partitioner.partition_in_memory(values.len(), options.chunking)?;

        let args = options.extra_args.clone().unwrap_or(Value::Null);
        let spec = self.spec(job_id, TaskKind::Map, function, &args, options.timeout);
        let payloads = self.shared.packager.package_partitions(
            &spec,
            &values,
            &partitions,
            options.chunking.is_per_element(),
        )?;
        Ok((payloads, partitions))
    }

    fn package_partitions(
        &self,
        job_id: &JobId,
        function: &str,
        partitions: &[Partition],
        options: &MapOptions,
    ) -> Result<Vec<PackagedTask>> {
        let args = options.extra_args.clone().unwrap_or(Value::Null);
        let spec = self.spec(job_id, TaskKind::Map, function, &args, options.timeout);
        self.shared.packager.package_partitions(&spec, &[], partitions, false)
    }

    /// Register a job and spawn its task drivers
    fn launch(
        &self,
        job_id: JobId,
        kind: JobKind,
        function: &str,
        payloads: Vec<PackagedTask>,
        reducers: Option<ReducerPlan>,
        partial_results: bool,
    ) -> Result<JobHandle> {
        let max_retries = self.config.max_retries;
        let map_count = payloads.len();

        let mut tasks: Vec<Arc<TaskRecord>> = payloads
            .iter()
            .map(|p| Arc::new(TaskRecord::new(p.index, TaskRole::Map, Some(p.clone()), max_retries)))
            .collect();
        let mut outputs: Vec<usize> = (0..map_count).collect();

        if let Some(plan) = &reducers {
            outputs.clear();
            for (r, inputs) in plan.groups.iter().enumerate() {
                let index = map_count + r;
                tasks.push(Arc::new(TaskRecord::new(
                    index,
                    TaskRole::Reduce {
                        inputs: inputs.clone(),
                    },
                    None,
                    max_retries,
                )));
                outputs.push(index);
            }
        }

        let job = Arc::new(JobRecord::new(
            job_id.clone(),
            kind,
            function.to_string(),
            reducers.as_ref().map(|p| p.function.clone()),
            tasks,
            outputs,
            partial_results,
        ));
        self.shared.state.insert(Arc::clone(&job));

        let handle = JobHandle {
            id: job_id,
            kind,
            task_count: job.tasks.len(),
            output_count: job.outputs.len(),
        };
        info!(
            job_id = %handle.id,
            kind = %kind,
            function = %function,
            tasks = handle.task_count,
            bytes = payloads.iter().map(PackagedTask::size).sum::<usize>(),
            "Job submitted"
        );

        for payload in payloads {
            let task = Arc::clone(&job.tasks[payload.index]);
            self.runtime.spawn(drive_task(
                Arc::clone(&self.shared),
                Arc::clone(&job),
                task,
                payload,
            ));
        }

        if let Some(plan) = reducers {
            for r in 0..plan.groups.len() {
                let task = Arc::clone(&job.tasks[map_count + r]);
                self.runtime.spawn(drive_reducer(
                    Arc::clone(&self.shared),
                    Arc::clone(&job),
                    task,
                    plan.function.clone(),
                    plan.args.clone(),
                    plan.timeout,
                ));
            }
        }

        Ok(handle)
    }

    // ─────────────────────────────────────────────────────────────
    // Waiting and results
    // ─────────────────────────────────────────────────────────────

    /// Wait until the `return_when` condition holds or `timeout` elapses
    ///
    /// A job given up on while tasks are pending is tagged as partial.
    pub async fn wait(
        &self,
        handle: &JobHandle,
        return_when: ReturnWhen,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome> {
        let job = self.shared.state.job(&handle.id)?;
        wait_job(&job, return_when, timeout).await;
        let (done, not_done) = job.split_done();
        Ok(WaitOutcome { done, not_done })
    }

    /// Wait for every task, then collect ordered results
    ///
    /// Uses the executor job timeout.
    pub async fn get_result(&self, handle: &JobHandle) -> Result<JobResult> {
        self.get_result_timeout(handle, self.config.job_timeout).await
    }

    /// `get_result` with an explicit deadline
    pub async fn get_result_timeout(
        &self,
        handle: &JobHandle,
        timeout: Option<Duration>,
    ) -> Result<JobResult> {
        let job = self.shared.state.job(&handle.id)?;
        if !wait_job(&job, ReturnWhen::AllCompleted, timeout).await && !job.is_complete() {
            let (_, not_done) = job.split_done();
            return Err(Error::JobTimeout {
                job_id: handle.id.to_string(),
                timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
                pending: not_done.len(),
            });
        }
        ResultCollector::collect(&job)
    }

    /// Results collected so far without waiting; unsettled slots are `Pending`
    pub fn partial_result(&self, handle: &JobHandle) -> Result<JobResult> {
        let job = self.shared.state.job(&handle.id)?;
        ResultCollector::collect(&job)
    }

    /// Status snapshot of a job
    pub fn status(&self, handle: &JobHandle) -> Result<JobStatus> {
        Ok(self.shared.state.job(&handle.id)?.status())
    }

    /// Ids of jobs not cleaned yet
    pub fn jobs(&self) -> Vec<JobId> {
        self.shared.state.job_ids()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.in_flight()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.shared.state.peak_in_flight()
    }

    // ─────────────────────────────────────────────────────────────
    // Cleanup
    // ─────────────────────────────────────────────────────────────

    /// Cancel a job and delete its remote activations
    ///
    /// Safe to call more than once; later calls delete nothing.
    pub async fn clean(&self, handle: &JobHandle) -> Result<CleanReport> {
        let job = match self.shared.state.job(&handle.id) {
            Ok(job) => job,
            Err(Error::JobCleaned { .. }) => {
                debug!(job_id = %handle.id, "Job already cleaned");
                return Ok(CleanReport {
                    job_id: handle.id.clone(),
                    deleted: 0,
                    failed: 0,
                    already_clean: true,
                });
            }
            Err(e) => return Err(e),
        };

        job.cancel();
        let activations: Vec<ActivationId> = job
            .tasks
            .iter()
            .flat_map(|task| task.claim_all_for_delete())
            .collect();

        let results = join_all(activations.iter().map(|id| self.backend.delete(id))).await;
        let mut failed = 0;
        for (id, result) in activations.iter().zip(&results) {
            if let Err(e) = result {
                failed += 1;
                warn!(job_id = %handle.id, activation = %id, error = %e, "Failed to delete activation");
            }
        }
        self.shared.state.take(&handle.id);

        let report = CleanReport {
            job_id: handle.id.clone(),
            deleted: activations.len() - failed,
            failed,
            already_clean: false,
        };
        info!(
            job_id = %handle.id,
            deleted = report.deleted,
            failed = report.failed,
            "Job cleaned"
        );
        Ok(report)
    }
}

/// Group map task indices under reducers
fn reducer_groups(grouping: ReducerGrouping, map_count: usize, per_object: &[usize]) -> Result<Vec<Vec<usize>>> {
    let groups = match grouping {
        ReducerGrouping::Single => vec![(0..map_count).collect()],
        ReducerGrouping::PerChunk(0) => {
            return Err(Error::partition("reducer chunk size must be greater than 0"))
        }
        ReducerGrouping::PerChunk(size) => (0..map_count)
            .step_by(size)
            .map(|start| (start..(start + size).min(map_count)).collect())
            .collect(),
        ReducerGrouping::PerObject => {
            let mut start = 0;
            per_object
                .iter()
                .map(|&count| {
                    let group: Vec<usize> = (start..start + count).collect();
                    start += count;
                    group
                })
                .collect()
        }
    };
    Ok(groups)
}

/// Returns whether the condition held before the timeout
async fn wait_job(job: &JobRecord, return_when: ReturnWhen, timeout: Option<Duration>) -> bool {
    let mut progress = job.subscribe();
    let condition = async {
        loop {
            let ready = match return_when {
                ReturnWhen::AllCompleted => job.is_complete(),
                ReturnWhen::AnyCompleted => job.terminal_count() > 0 || job.tasks.is_empty(),
                ReturnWhen::Always => true,
            };
            if ready || progress.changed().await.is_err() {
                return;
            }
        }
    };

    let finished = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, condition).await.is_ok(),
        None => {
            condition.await;
            true
        }
    };
    if !finished {
        job.mark_partial();
        debug!(job_id = %job.id, terminal = job.terminal_count(), total = job.tasks.len(), "Wait gave up");
    }
    finished
}

// ─────────────────────────────────────────────────────────────────
// Task Drivers
// ─────────────────────────────────────────────────────────────────

/// Resolves once the job is cancelled
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Apply an event, ignoring ones that arrive after the task settled
fn advance(task: &TaskRecord, event: TaskEvent) -> TaskState {
    match task.apply(event) {
        Ok(state) => state,
        Err(e) => {
            debug!(task = task.index, error = %e, "Ignored task event");
            task.state()
        }
    }
}

fn failed(task: &TaskRecord, state: TaskState) -> TaskOutcome {
    TaskOutcome::Failed {
        state,
        message: task.last_error().unwrap_or_default(),
    }
}

/// Record a task's outcome and count it as terminal
fn finish(job: &JobRecord, task: &TaskRecord, outcome: TaskOutcome) {
    if job.is_cancelled() {
        advance(task, TaskEvent::Cancel);
    } else {
        debug!(job_id = %job.id, task = task.index, state = %task.state(), "Task settled");
        task.set_outcome(outcome);
    }
    job.mark_terminal();
    if job.is_complete() && !job.is_cancelled() {
        info!(job_id = %job.id, tasks = job.tasks.len(), "Job finished");
    }
}

async fn drive_task(shared: Arc<Shared>, job: Arc<JobRecord>, task: Arc<TaskRecord>, payload: PackagedTask) {
    let outcome = run_attempts(&shared, &job, &task, &payload).await;
    finish(&job, &task, outcome);
}

/// Dispatch `payload` until it settles or the retry budget runs out
async fn run_attempts(
    shared: &Shared,
    job: &JobRecord,
    task: &TaskRecord,
    payload: &PackagedTask,
) -> TaskOutcome {
    let mut cancel = job.cancel_receiver();
    let mut retry = shared.retry.clone();
    retry.reset();

    loop {
        let slot = tokio::select! {
            slot = shared.dispatcher.acquire() => slot,
            _ = cancelled(&mut cancel) => return TaskOutcome::Pending,
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(e) => {
                let state = advance(task, TaskEvent::Abandoned { message: e.to_string() });
                return failed(task, state);
            }
        };

        let attempt = task.attempt();
        let activation = match shared.dispatcher.submit(payload, attempt, &slot).await {
            Ok(activation) => activation,
            Err(e) if e.is_retryable() => {
                let state = advance(
                    task,
                    TaskEvent::Transient {
                        message: e.to_string(),
                        timed_out: false,
                    },
                );
                if state != TaskState::Retrying {
                    warn!(job_id = %job.id, task = task.index, attempt, error = %e, "Task failed to dispatch");
                    return failed(task, state);
                }
                warn!(job_id = %job.id, task = task.index, attempt, error = %e, "Submission failed, retrying");
                drop(slot);
                if !backoff(&mut retry, &mut cancel).await {
                    return TaskOutcome::Pending;
                }
                continue;
            }
            Err(e) => {
                warn!(job_id = %job.id, task = task.index, attempt, error = %e, "Backend refused task");
                let state = advance(task, TaskEvent::DispatchRejected { message: e.to_string() });
                return failed(task, state);
            }
        };

        task.record_activation(activation.clone());
        if job.is_cancelled() {
            if task.claim_for_delete(&activation) {
                shared.dispatcher.release(&activation).await;
            }
            return TaskOutcome::Pending;
        }
        advance(task, TaskEvent::Dispatched);

        let resolution = tokio::select! {
            resolution = shared.monitor.watch(task, &activation, payload.timeout) => resolution,
            _ = cancelled(&mut cancel) => return TaskOutcome::Pending,
        };

        match resolution {
            Resolution::Completed(outcome) => {
                advance(task, TaskEvent::Completed);
                return outcome;
            }
            Resolution::Permanent { message } => {
                warn!(job_id = %job.id, task = task.index, attempt, error = %message, "Task failed");
                let state = advance(task, TaskEvent::Permanent { message });
                return failed(task, state);
            }
            Resolution::Transient {
                message,
                timed_out,
                live,
            } => {
                // The slot only goes back once the old activation is gone
                if live && task.claim_for_delete(&activation) {
                    shared.dispatcher.release(&activation).await;
                }
                let state = advance(task, TaskEvent::Transient { message: message.clone(), timed_out });
                if state != TaskState::Retrying {
                    warn!(job_id = %job.id, task = task.index, attempt, state = %state, error = %message, "Retries exhausted");
                    return failed(task, state);
                }
                warn!(job_id = %job.id, task = task.index, attempt, error = %message, "Transient fault, retrying");
                drop(slot);
                if !backoff(&mut retry, &mut cancel).await {
                    return TaskOutcome::Pending;
                }
            }
        }
    }
}

/// Sleep before a retry; false if the job was cancelled meanwhile
async fn backoff(retry: &mut ExponentialBackoff, cancel: &mut watch::Receiver<bool>) -> bool {
    let delay = retry.next_backoff().unwrap_or(retry.max_interval);
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancelled(cancel) => false,
    }
}

async fn drive_reducer(
    shared: Arc<Shared>,
    job: Arc<JobRecord>,
    task: Arc<TaskRecord>,
    function: String,
    args: Value,
    timeout: Option<Duration>,
) {
    let outcome = run_reducer(&shared, &job, &task, &function, &args, timeout).await;
    finish(&job, &task, outcome);
}

/// Wait for a reducer's inputs, then package and run it
async fn run_reducer(
    shared: &Shared,
    job: &JobRecord,
    task: &TaskRecord,
    function: &str,
    args: &Value,
    timeout: Option<Duration>,
) -> TaskOutcome {
    let inputs = match &task.role {
        TaskRole::Reduce { inputs } => inputs.clone(),
        TaskRole::Map => Vec::new(),
    };

    let mut progress = job.subscribe();
    let mut cancel = job.cancel_receiver();
    loop {
        let settled = inputs
            .iter()
            .all(|&i| job.tasks.get(i).map_or(true, |t| t.has_outcome()));
        if settled {
            break;
        }
        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = cancelled(&mut cancel) => return TaskOutcome::Pending,
        }
    }

    let input = match ResultCollector::reducer_input(job, &inputs) {
        Ok(ReducerInput::Ready(input)) => input,
        Ok(ReducerInput::Blocked(outcome)) => {
            let message = outcome.error_message().unwrap_or_default();
            warn!(job_id = %job.id, task = task.index, error = %message, "Reducer input failed");
            advance(task, TaskEvent::Abandoned { message });
            return outcome;
        }
        Err(e) => {
            let state = advance(task, TaskEvent::Abandoned { message: e.to_string() });
            return failed(task, state);
        }
    };

    let spec = PackageSpec {
        job_id: job.id.as_str(),
        kind: TaskKind::Reduce,
        function,
        args,
        timeout,
    };
    let payload = match shared.packager.package(&spec, task.index, input) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(job_id = %job.id, task = task.index, error = %e, "Reducer could not be packaged");
            let state = advance(task, TaskEvent::Abandoned { message: e.to_string() });
            return failed(task, state);
        }
    };
    task.set_payload(payload.clone());
    debug!(job_id = %job.id, task = task.index, inputs = inputs.len(), "Reducer ready");

    run_attempts(shared, job, task, &payload).await
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
