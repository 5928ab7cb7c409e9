//! Ordered-map runqueue with duplicate-key bucketing.
//!
//! Balanced ordered map from an integer key (remaining runtime for SJF,
//! virtual runtime for the fair policy) to queued tasks. Duplicates at one
//! key form an insertion-order bucket; `min`/`pop_min` return the bucket
//! head. A bucket shrinking to one task collapses back to a scalar entry.
//!
//! `BTreeMap` provides the balanced-tree guarantees the red-black tree gives
//! the reference design.

use std::collections::{BTreeMap, VecDeque};

use crate::types::TaskId;

/// Entry under one key: scalar for the common unique-key case.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RqSlot {
    Single(TaskId),
    Bucket(VecDeque<TaskId>),
}

/// Ordered runqueue keyed by a `u64` scheduling key.
#[derive(Debug, Clone, Default)]
pub struct OrderedRunqueue {
    map: BTreeMap<u64, RqSlot>,
    len: usize,
}

impl OrderedRunqueue {
    pub fn new() -> Self {
        OrderedRunqueue {
            map: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.len = 0;
    }

    /// Insert `task` at `key`, appending to the bucket on collision.
    pub fn insert(&mut self, key: u64, task: TaskId) {
        match self.map.remove(&key) {
            None => {
                self.map.insert(key, RqSlot::Single(task));
            }
            Some(RqSlot::Single(existing)) => {
                let mut bucket = VecDeque::with_capacity(2);
                bucket.push_back(existing);
                bucket.push_back(task);
                self.map.insert(key, RqSlot::Bucket(bucket));
            }
            Some(RqSlot::Bucket(mut bucket)) => {
                bucket.push_back(task);
                self.map.insert(key, RqSlot::Bucket(bucket));
            }
        }
        self.len += 1;
    }

    /// Remove `task` from the entry at `key`. Returns false when the task
    /// is not stored there (the caller treats that as a protocol error).
    pub fn remove(&mut self, key: u64, task: TaskId) -> bool {
        match self.map.get_mut(&key) {
            None => false,
            Some(RqSlot::Single(t)) => {
                if *t != task {
                    return false;
                }
                self.map.remove(&key);
                self.len -= 1;
                true
            }
            Some(RqSlot::Bucket(bucket)) => {
                let Some(pos) = bucket.iter().position(|t| *t == task) else {
                    return false;
                };
                bucket.remove(pos);
                if bucket.len() == 1 {
                    let last = bucket[0];
                    self.map.insert(key, RqSlot::Single(last));
                }
                self.len -= 1;
                true
            }
        }
    }

    /// The minimum key and its bucket head, without removal.
    pub fn min(&self) -> Option<(u64, TaskId)> {
        let (&key, slot) = self.map.iter().next()?;
        let task = match slot {
            RqSlot::Single(t) => *t,
            RqSlot::Bucket(bucket) => bucket[0],
        };
        Some((key, task))
    }

    /// Remove and return the minimum key's bucket head.
    pub fn pop_min(&mut self) -> Option<(u64, TaskId)> {
        let (key, task) = self.min()?;
        let removed = self.remove(key, task);
        debug_assert!(removed);
        Some((key, task))
    }

    /// All queued tasks in key order (bucket order within a key). Used by
    /// invariant checks and statistics, not by dispatch.
    pub fn iter(&self) -> impl Iterator<Item = (u64, TaskId)> + '_ {
        self.map.iter().flat_map(|(&key, slot)| {
            let tasks: Vec<TaskId> = match slot {
                RqSlot::Single(t) => vec![*t],
                RqSlot::Bucket(bucket) => bucket.iter().copied().collect(),
            };
            tasks.into_iter().map(move |t| (key, t))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_is_smallest_key() {
        let mut rq = OrderedRunqueue::new();
        rq.insert(30, TaskId(1));
        rq.insert(10, TaskId(2));
        rq.insert(20, TaskId(3));
        assert_eq!(rq.min(), Some((10, TaskId(2))));
        assert_eq!(rq.pop_min(), Some((10, TaskId(2))));
        assert_eq!(rq.pop_min(), Some((20, TaskId(3))));
        assert_eq!(rq.pop_min(), Some((30, TaskId(1))));
        assert_eq!(rq.pop_min(), None);
    }

    #[test]
    fn test_duplicate_keys_bucket_fifo() {
        let mut rq = OrderedRunqueue::new();
        rq.insert(5, TaskId(1));
        rq.insert(5, TaskId(2));
        rq.insert(5, TaskId(3));
        assert_eq!(rq.len(), 3);
        assert_eq!(rq.pop_min(), Some((5, TaskId(1))));
        assert_eq!(rq.pop_min(), Some((5, TaskId(2))));
        assert_eq!(rq.pop_min(), Some((5, TaskId(3))));
    }

    #[test]
    fn test_remove_specific_task() {
        let mut rq = OrderedRunqueue::new();
        rq.insert(5, TaskId(1));
        rq.insert(5, TaskId(2));
        rq.insert(9, TaskId(3));

        assert!(rq.remove(5, TaskId(2)));
        assert!(!rq.remove(5, TaskId(2)));
        assert!(!rq.remove(9, TaskId(1)));
        assert_eq!(rq.len(), 2);
        assert_eq!(rq.pop_min(), Some((5, TaskId(1))));
    }

    #[test]
    fn test_iter_in_order() {
        let mut rq = OrderedRunqueue::new();
        rq.insert(7, TaskId(1));
        rq.insert(3, TaskId(2));
        rq.insert(7, TaskId(3));
        let all: Vec<_> = rq.iter().collect();
        assert_eq!(
            all,
            vec![(3, TaskId(2)), (7, TaskId(1)), (7, TaskId(3))]
        );
    }
}
