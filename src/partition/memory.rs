//! In-memory collection partitioning

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Partition;

/// How an in-memory collection is split into tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum Chunking {
    /// One task per element; the task input is the element itself
    #[default]
    PerElement,
    /// Tasks of at most N consecutive elements; the task input is an array
    Size(usize),
    /// Exactly min(N, len) tasks of balanced size; the task input is an array
    Count(usize),
}

impl Chunking {
    /// Whether tasks receive a bare element rather than an array
    pub fn is_per_element(&self) -> bool {
        matches!(self, Chunking::PerElement)
    }
}

pub(super) fn partition(len: usize, chunking: Chunking) -> Result<Vec<Partition>> {
    if len == 0 {
        return Err(Error::partition("input collection is empty"));
    }

    let partitions = match chunking {
        Chunking::PerElement => (0..len).map(|i| Partition::items(i, i, i + 1)).collect(),
        Chunking::Size(0) => return Err(Error::partition("chunk size must be greater than 0")),
        Chunking::Size(size) => (0..len)
            .step_by(size)
            .enumerate()
            .map(|(index, start)| Partition::items(index, start, (start + size).min(len)))
            .collect(),
        Chunking::Count(0) => return Err(Error::partition("chunk count must be greater than 0")),
        Chunking::Count(count) => {
            let count = count.min(len);
            let base = len / count;
            let extra = len % count;
            let mut start = 0;
            (0..count)
                .map(|index| {
                    let size = base + usize::from(index < extra);
                    let partition = Partition::items(index, start, start + size);
                    start += size;
                    partition
                })
                .collect()
        }
    };

    Ok(partitions)
}
