//! Task packaging
//!
//! Turns partitions into self-contained, immutable payloads. Packaging a job
//! is all-or-nothing: the first item that cannot be encoded fails the whole
//! job before anything is dispatched.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::function::FunctionCatalog;
use crate::types::{PackagedTask, Partition, PartitionSource, TaskKind, TaskPayload};

/// Default per-payload limit (8 MiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// What every task of one packaging request shares
#[derive(Debug, Clone)]
pub struct PackageSpec<'a> {
    pub job_id: &'a str,
    pub kind: TaskKind,
    pub function: &'a str,
    pub args: &'a Value,
    pub timeout: Option<Duration>,
}

/// Encodes task payloads
#[derive(Debug, Clone)]
pub struct TaskPackager {
    catalog: Arc<FunctionCatalog>,
    max_payload_bytes: usize,
}

impl TaskPackager {
    pub fn new(catalog: Arc<FunctionCatalog>, max_payload_bytes: usize) -> Self {
        Self {
            catalog,
            max_payload_bytes,
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Fail unless `function` can be shipped to workers
    pub fn ensure_function(&self, function: &str) -> Result<()> {
        if self.catalog.contains(function) {
            Ok(())
        } else {
            Err(Error::FunctionNotFound {
                name: function.to_string(),
            })
        }
    }

    /// Encode caller items into JSON values, reporting the first failing index
    pub fn encode_items<T, I>(items: I) -> Result<Vec<Value>>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::to_value(item).map_err(|e| Error::serialization(index, e.to_string()))
            })
            .collect()
    }

    /// Data handed to the function for one partition
    ///
    /// Per-element item partitions carry the bare element; chunked ones carry
    /// an array; storage partitions carry their descriptor.
    pub fn partition_data(
        values: &[Value],
        partition: &Partition,
        per_element: bool,
    ) -> Result<Value> {
        match &partition.source {
            PartitionSource::Items { start, end } => {
                let slice = values.get(*start..*end).ok_or_else(|| {
                    Error::partition(format!(
                        "partition {} range {}..{} is outside {} items",
                        partition.index,
                        start,
                        end,
                        values.len()
                    ))
                })?;
                if per_element && slice.len() == 1 {
                    Ok(slice[0].clone())
                } else {
                    Ok(Value::Array(slice.to_vec()))
                }
            }
            PartitionSource::Objects { .. } => serde_json::to_value(partition)
                .map_err(|e| Error::serialization(partition.index, e.to_string())),
        }
    }

    /// Package one task
    pub fn package(&self, spec: &PackageSpec<'_>, index: usize, data: Value) -> Result<PackagedTask> {
        self.ensure_function(spec.function)?;

        let payload = TaskPayload {
            job_id: spec.job_id.to_string(),
            index,
            kind: spec.kind,
            function: spec.function.to_string(),
            data,
            args: spec.args.clone(),
        };
        let bytes = serde_json::to_vec(&payload).map_err(|e| Error::serialization(index, e.to_string()))?;

        if bytes.len() > self.max_payload_bytes {
            return Err(Error::serialization(
                index,
                format!(
                    "payload of {} bytes exceeds the {} byte limit",
                    bytes.len(),
                    self.max_payload_bytes
                ),
            ));
        }

        let digest = hex::encode(Sha256::digest(&bytes));
        Ok(PackagedTask {
            job_id: payload.job_id,
            index,
            kind: spec.kind,
            function: payload.function,
            bytes: Arc::from(bytes),
            digest,
            timeout: spec.timeout,
        })
    }

    /// Package one task per partition, in partition order
    pub fn package_partitions(
        &self,
        spec: &PackageSpec<'_>,
        values: &[Value],
        partitions: &[Partition],
        per_element: bool,
    ) -> Result<Vec<PackagedTask>> {
        self.ensure_function(spec.function)?;

        let tasks = partitions
            .iter()
            .map(|partition| {
                let data = Self::partition_data(values, partition, per_element)?;
                self.package(spec, partition.index, data)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            job_id = spec.job_id,
            function = spec.function,
            tasks = tasks.len(),
            bytes = tasks.iter().map(PackagedTask::size).sum::<usize>(),
            "Packaged tasks"
        );
        Ok(tasks)
    }
}
