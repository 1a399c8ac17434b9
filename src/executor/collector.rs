//! Result collection
//!
//! Assembles per-task outcomes into the caller-facing job result, in task
//! creation order regardless of completion order.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{JobId, JobKind, TaskOutcome};

use super::JobRecord;

/// Ordered outcomes of a job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub kind: JobKind,
    outcomes: Vec<TaskOutcome>,
}

impl JobResult {
    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<TaskOutcome> {
        self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether every slot holds a value
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_value)
    }

    /// Slots that do not hold a value, with their positions
    pub fn errors(&self) -> impl Iterator<Item = (usize, &TaskOutcome)> {
        self.outcomes.iter().enumerate().filter(|(_, o)| !o.is_value())
    }

    /// Raw values, failing on the first slot without one
    pub fn raw_values(&self) -> Result<Vec<Value>> {
        self.outcomes
            .iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                TaskOutcome::Value { value } => Ok(value.clone()),
                other => Err(Error::TaskFailed {
                    index,
                    message: other.error_message().unwrap_or_default(),
                }),
            })
            .collect()
    }

    /// Typed values, failing on the first slot without one
    pub fn values<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.raw_values()?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Error::from))
            .collect()
    }

    /// The single value of a call_async job or single-reducer map_reduce job
    pub fn value<T: DeserializeOwned>(&self) -> Result<T> {
        match self.raw_values()?.as_slice() {
            [single] => Ok(serde_json::from_value(single.clone())?),
            values => Err(Error::Internal(format!(
                "expected exactly one result, job has {}",
                values.len()
            ))),
        }
    }
}

/// Input prepared for a reducer
#[derive(Debug, Clone, PartialEq)]
pub enum ReducerInput {
    /// Ordered array of input values
    Ready(Value),
    /// The reducer cannot run; its outcome is the contained one
    Blocked(TaskOutcome),
}

/// Builds job results from job records
pub struct ResultCollector;

impl ResultCollector {
    /// Collect output outcomes in order; non-terminal slots are `Pending`
    ///
    /// Fails with `Reduction` when a reducer could not run because an
    /// input never resolved.
    pub fn collect(job: &JobRecord) -> Result<JobResult> {
        let mut outcomes = Vec::with_capacity(job.outputs.len());
        for (position, &index) in job.outputs.iter().enumerate() {
            let outcome = job.task(index)?.outcome();
            if let TaskOutcome::DependencyFailed { dependency, message } = &outcome {
                return Err(Error::Reduction {
                    job_id: job.id.to_string(),
                    reducer: position,
                    dependency: *dependency,
                    message: message.clone(),
                });
            }
            outcomes.push(outcome);
        }

        Ok(JobResult {
            job_id: job.id.clone(),
            kind: job.kind,
            outcomes,
        })
    }

    /// Reducer input for `inputs`, or the first input that blocks the reducer
    ///
    /// Without partial results, an input that failed at the engine level (or
    /// never settled) blocks the reducer. User exceptions never block it;
    /// they reach the reducer as tagged error values.
    pub fn reducer_input(job: &JobRecord, inputs: &[usize]) -> Result<ReducerInput> {
        let mut values = Vec::with_capacity(inputs.len());
        for &index in inputs {
            let outcome = job.task(index)?.outcome();
            if !job.partial_results && (outcome.is_failure() || outcome.is_pending()) {
                let message = outcome
                    .error_message()
                    .unwrap_or_else(|| "input failed".to_string());
                return Ok(ReducerInput::Blocked(TaskOutcome::DependencyFailed {
                    dependency: index,
                    message,
                }));
            }
            values.push(outcome.to_reducer_input());
        }
        Ok(ReducerInput::Ready(Value::Array(values)))
    }
}
