//! Input partitioning
//!
//! Splits job input into an ordered sequence of disjoint partitions:
//! - in-memory collections by element, chunk size or chunk count
//! - object-storage prefixes by listing, greedy bin-packing and byte-range splits
//!
//! Partitioning is deterministic: the same input and options always
//! produce the same partitions in the same order.

mod discovery;
mod memory;
mod storage;

pub use discovery::{Discovery, DiscoveryOptions};
pub use memory::Chunking;
pub use storage::{ListPage, LocalObjectStore, MemoryObjectStore, ObjectInfo, ObjectLister};

use crate::error::{Error, Result};
use crate::types::Partition;

/// Default cap on bytes packed into one storage partition (64 MiB)
pub const DEFAULT_MAX_PARTITION_BYTES: u64 = 64 * 1024 * 1024;

/// Splits job input into partitions
#[derive(Debug, Clone)]
pub struct Partitioner {
    max_partition_bytes: u64,
}

impl Default for Partitioner {
    fn default() -> Self {
        Self {
            max_partition_bytes: DEFAULT_MAX_PARTITION_BYTES,
        }
    }
}

impl Partitioner {
    /// Create a partitioner with a byte cap for storage partitions
    pub fn new(max_partition_bytes: u64) -> Result<Self> {
        if max_partition_bytes == 0 {
            return Err(Error::config_field_invalid(
                "partitioner.max_partition_bytes",
                "must be greater than 0",
            ));
        }
        Ok(Self { max_partition_bytes })
    }

    pub fn max_partition_bytes(&self) -> u64 {
        self.max_partition_bytes
    }

    /// Partition an in-memory collection of `len` elements
    pub fn partition_in_memory(&self, len: usize, chunking: Chunking) -> Result<Vec<Partition>> {
        memory::partition(len, chunking)
    }

    /// Partition every object under `prefix`
    pub async fn discover(
        &self,
        lister: &dyn ObjectLister,
        prefix: &str,
        options: &DiscoveryOptions,
    ) -> Result<Discovery> {
        discovery::discover(lister, prefix, options, self.max_partition_bytes).await
    }
}
