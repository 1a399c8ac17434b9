//! Partition descriptors

use serde::{Deserialize, Serialize};

/// A byte range of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSlice {
    pub key: String,
    /// Inclusive start offset
    pub start: u64,
    /// Exclusive end offset
    pub end: u64,
    /// Total size of the object the slice belongs to
    pub object_size: u64,
}

impl ObjectSlice {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the slice covers its object from first to last byte
    pub fn is_whole_object(&self) -> bool {
        self.start == 0 && self.end == self.object_size
    }
}

/// Where a partition's data comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionSource {
    /// Contiguous sub-sequence `[start, end)` of an in-memory collection
    Items { start: usize, end: usize },
    /// One or more object byte ranges
    Objects { slices: Vec<ObjectSlice> },
}

/// A disjoint slice of job input assigned to one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Position in the job's ordered partition sequence
    pub index: usize,
    pub source: PartitionSource,
    /// Item count or byte count used for load balancing
    pub estimated_size: u64,
}

impl Partition {
    pub fn items(index: usize, start: usize, end: usize) -> Self {
        Self {
            index,
            source: PartitionSource::Items { start, end },
            estimated_size: (end - start) as u64,
        }
    }

    pub fn objects(index: usize, slices: Vec<ObjectSlice>) -> Self {
        let estimated_size = slices.iter().map(ObjectSlice::len).sum();
        Self {
            index,
            source: PartitionSource::Objects { slices },
            estimated_size,
        }
    }

    /// Item range for in-memory partitions
    pub fn item_range(&self) -> Option<std::ops::Range<usize>> {
        match self.source {
            PartitionSource::Items { start, end } => Some(start..end),
            PartitionSource::Objects { .. } => None,
        }
    }

    /// Object slices for storage partitions
    pub fn slices(&self) -> &[ObjectSlice] {
        match &self.source {
            PartitionSource::Objects { slices } => slices,
            PartitionSource::Items { .. } => &[],
        }
    }

    /// Key of the first object this partition reads, used to group reducers per object
    pub fn primary_key(&self) -> Option<&str> {
        self.slices().first().map(|s| s.key.as_str())
    }
}
