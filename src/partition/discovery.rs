//! Storage partition discovery
//!
//! Lists every page under a prefix, then packs objects greedily in key order
//! into partitions of at most `cap` bytes. Objects larger than the cap are
//! split into byte ranges that each become their own partition.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::storage::{ObjectInfo, ObjectLister};
use crate::error::{Error, Result};
use crate::types::{ObjectSlice, Partition};

/// Options for one discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Byte cap per partition; the partitioner default when `None`
    pub chunk_bytes: Option<u64>,
    /// Split every object into this many byte ranges instead of packing
    pub chunk_number: Option<usize>,
    /// Pack several small objects into one partition
    pub pack_objects: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            chunk_bytes: None,
            chunk_number: None,
            pack_objects: true,
        }
    }
}

/// Result of a discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub partitions: Vec<Partition>,
    /// Listed objects in key order
    pub objects: Vec<ObjectInfo>,
    /// Number of listing pages fetched
    pub pages: usize,
}

impl Discovery {
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }

    /// Consecutive runs of partitions that read the same first object
    ///
    /// Yields `(key, partition count)` in partition order.
    pub fn parts_per_object(&self) -> Vec<(String, usize)> {
        let mut groups: Vec<(String, usize)> = Vec::new();
        for partition in &self.partitions {
            let key = partition.primary_key().unwrap_or_default();
            match groups.last_mut() {
                Some((last, count)) if last == key => *count += 1,
                _ => groups.push((key.to_string(), 1)),
            }
        }
        groups
    }
}

pub(super) async fn discover(
    lister: &dyn ObjectLister,
    prefix: &str,
    options: &DiscoveryOptions,
    default_cap: u64,
) -> Result<Discovery> {
    let cap = options.chunk_bytes.unwrap_or(default_cap);
    if cap == 0 {
        return Err(Error::partition("partition byte cap must be greater than 0"));
    }
    if options.chunk_number == Some(0) {
        return Err(Error::partition("chunk number must be greater than 0"));
    }

    let (mut objects, pages) = list_all(lister, prefix).await?;
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    objects.dedup_by(|a, b| a.key == b.key);

    tracing::debug!(
        lister = lister.name(),
        prefix,
        objects = objects.len(),
        pages,
        "Listed objects"
    );

    let partitions = if objects.is_empty() {
        match options.chunk_number {
            // An explicit task count still yields that many (empty) tasks
            Some(n) => (0..n).map(|i| Partition::objects(i, Vec::new())).collect(),
            None => {
                return Err(Error::partition(format!(
                    "no objects found under '{}' in {} store",
                    prefix,
                    lister.name()
                )))
            }
        }
    } else if let Some(n) = options.chunk_number {
        split_each(&objects, n)
    } else {
        pack(&objects, cap, options.pack_objects)
    };

    Ok(Discovery {
        partitions,
        objects,
        pages,
    })
}

async fn list_all(lister: &dyn ObjectLister, prefix: &str) -> Result<(Vec<ObjectInfo>, usize)> {
    let mut objects = Vec::new();
    let mut seen_tokens = HashSet::new();
    let mut token: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = lister
            .list_page(prefix, token.as_deref())
            .await
            .map_err(|e| {
                Error::partition(format!("listing '{}' in {} store failed: {}", prefix, lister.name(), e))
            })?;
        pages += 1;
        objects.extend(page.objects);

        match page.next_token {
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(Error::partition(format!(
                        "listing '{}' returned continuation token '{}' twice",
                        prefix, next
                    )));
                }
                token = Some(next);
            }
            None => break,
        }
    }

    Ok((objects, pages))
}

fn ranges(object: &ObjectInfo, range_size: u64) -> impl Iterator<Item = ObjectSlice> + '_ {
    let range_size = range_size.max(1);
    let count = object.size.div_ceil(range_size).max(1);
    (0..count).map(move |i| {
        let start = i * range_size;
        ObjectSlice {
            key: object.key.clone(),
            start,
            end: (start + range_size).min(object.size),
            object_size: object.size,
        }
    })
}

fn split_each(objects: &[ObjectInfo], chunk_number: usize) -> Vec<Partition> {
    objects
        .iter()
        .flat_map(|object| {
            let range_size = object.size.div_ceil(chunk_number as u64);
            ranges(object, range_size)
        })
        .enumerate()
        .map(|(index, slice)| Partition::objects(index, vec![slice]))
        .collect()
}

fn flush(current: &mut Vec<ObjectSlice>, current_size: &mut u64, partitions: &mut Vec<Partition>) {
    if !current.is_empty() {
        let index = partitions.len();
        partitions.push(Partition::objects(index, std::mem::take(current)));
        *current_size = 0;
    }
}

fn pack(objects: &[ObjectInfo], cap: u64, pack_objects: bool) -> Vec<Partition> {
    let mut partitions = Vec::new();
    let mut current: Vec<ObjectSlice> = Vec::new();
    let mut current_size = 0u64;

    for object in objects {
        if object.size > cap {
            flush(&mut current, &mut current_size, &mut partitions);
            for slice in ranges(object, cap) {
                let index = partitions.len();
                partitions.push(Partition::objects(index, vec![slice]));
            }
            continue;
        }

        if !pack_objects || current_size + object.size > cap {
            flush(&mut current, &mut current_size, &mut partitions);
        }
        current.push(ObjectSlice {
            key: object.key.clone(),
            start: 0,
            end: object.size,
            object_size: object.size,
        });
        current_size += object.size;
    }
    flush(&mut current, &mut current_size, &mut partitions);

    partitions
}
