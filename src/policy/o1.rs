//! The Linux 2.6 O(1) scheduler.
//!
//! Two arrays ("active" and "expired") of 140 FIFO lists indexed by
//! `priority + 120`, each with a presence bitmap. Selection scans the
//! active bitmap for the lowest set index; when the active array drains,
//! the arrays swap. Priorities -120..-21 are real-time with a fixed slice;
//! -20..19 are standard with a nice-derived slice.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{check_priority_range, parse_params, PolicyCtx, SchedPolicy};
use crate::stats::{ClassCounters, ClassStatsReport};
use crate::types::TaskId;

use std::collections::VecDeque;

/// Number of priority levels (-120..=19 shifted to 0..140).
const NR_PRIO: usize = 140;
/// First non-realtime index (priority -20).
const STANDARD_BASE: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct O1Params {
    time_scale: Option<u64>,
}

/// One priority array: 140 FIFO lists plus a presence bitmap.
#[derive(Debug)]
struct PrioArray {
    queues: Vec<VecDeque<TaskId>>,
    bitmap: [u64; 3],
}

impl PrioArray {
    fn new() -> Self {
        PrioArray {
            queues: (0..NR_PRIO).map(|_| VecDeque::new()).collect(),
            bitmap: [0; 3],
        }
    }

    fn clear(&mut self) {
        for q in &mut self.queues {
            q.clear();
        }
        self.bitmap = [0; 3];
    }

    fn insert(&mut self, idx: usize, task: TaskId) {
        self.queues[idx].push_back(task);
        self.bitmap[idx / 64] |= 1 << (idx % 64);
    }

    fn remove(&mut self, idx: usize, task: TaskId) -> bool {
        let Some(pos) = self.queues[idx].iter().position(|t| *t == task) else {
            return false;
        };
        self.queues[idx].remove(pos);
        if self.queues[idx].is_empty() {
            self.bitmap[idx / 64] &= !(1 << (idx % 64));
        }
        true
    }

    /// Lowest set index (highest priority), if any.
    fn first_set(&self) -> Option<usize> {
        for (word_idx, &word) in self.bitmap.iter().enumerate() {
            if word != 0 {
                return Some(word_idx * 64 + word.trailing_zeros() as usize);
            }
        }
        None
    }

    fn pop_first(&mut self) -> Option<TaskId> {
        let idx = self.first_set()?;
        let task = self.queues[idx].pop_front().expect("bitmap bit set");
        if self.queues[idx].is_empty() {
            self.bitmap[idx / 64] &= !(1 << (idx % 64));
        }
        Some(task)
    }

    fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|w| *w == 0)
    }

    fn tasks(&self) -> Vec<TaskId> {
        self.queues.iter().flatten().copied().collect()
    }
}

#[derive(Debug)]
pub struct O1 {
    active: PrioArray,
    expired: PrioArray,
    time_scale: u64,
    /// Active/expired swaps performed, reported in class stats.
    swaps: u64,
}

impl O1 {
    pub fn new() -> Self {
        O1 {
            active: PrioArray::new(),
            expired: PrioArray::new(),
            time_scale: 1,
            swaps: 0,
        }
    }

    fn prio_index(priority: i64) -> usize {
        (priority + 120) as usize
    }

    /// Fresh slice for a priority: fixed for real-time levels, nice-derived
    /// for standard ones.
    fn base_slice(&self, priority: i64) -> i64 {
        let slice = if Self::prio_index(priority) < STANDARD_BASE {
            900.0
        } else {
            ((19 - priority) as f64 * 20.4 + 5.0).round()
        };
        slice as i64 * self.time_scale as i64
    }

    fn live_slice(ctx: &PolicyCtx<'_>, task: TaskId) -> i64 {
        let t = &ctx.tasks[task];
        t.sched.time_slice - (ctx.now - t.picked_at) as i64
    }
}

impl Default for O1 {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for O1 {
    fn name(&self) -> &'static str {
        "o1"
    }

    fn init(
        &mut self,
        ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: O1Params = parse_params(self.name(), params)?;
        self.time_scale = match params.time_scale {
            None => 1,
            Some(v) if v > 0 => v,
            Some(_) => {
                return Err(ConfigError::InvalidClassParam {
                    class: self.name().to_string(),
                    param: "time_scale".to_string(),
                    reason: "must be positive".to_string(),
                })
            }
        };
        check_priority_range(self.name(), ctx, members, -120, 19)?;
        self.active.clear();
        self.expired.clear();
        self.swaps = 0;
        for &id in members {
            let prio = ctx.tasks[id].priority();
            ctx.tasks[id].sched.time_slice = self.base_slice(prio);
        }
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        let idx = Self::prio_index(ctx.tasks[task].priority());
        self.active.insert(idx, task);
        ctx.tasks[task].on_rq = true;
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        let idx = Self::prio_index(ctx.tasks[task].priority());
        if !self.active.remove(idx, task) && !self.expired.remove(idx, task) {
            return Err(SimError::invariant(
                ctx.now,
                format!(
                    "o1: task {:?} not stored under priority index {idx}",
                    ctx.tasks[task].pname
                ),
            ));
        }
        ctx.tasks[task].on_rq = false;
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> Option<TaskId> {
        if self.active.is_empty() {
            if self.expired.is_empty() {
                return None;
            }
            std::mem::swap(&mut self.active, &mut self.expired);
            self.swaps += 1;
        }
        let task = self.active.pop_first()?;
        ctx.tasks[task].on_rq = false;
        Some(task)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError> {
        let elapsed = ctx.tasks[prev].exec_time - ctx.tasks[prev].sched.prev_sum_exec;
        ctx.tasks[prev].sched.time_slice -= elapsed as i64;
        if ctx.tasks[prev].runnable {
            let prio = ctx.tasks[prev].priority();
            let idx = Self::prio_index(prio);
            if ctx.tasks[prev].sched.time_slice <= 0 {
                ctx.tasks[prev].sched.time_slice = self.base_slice(prio);
                self.expired.insert(idx, prev);
            } else {
                self.active.insert(idx, prev);
            }
            ctx.tasks[prev].on_rq = true;
        }
        Ok(())
    }

    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, new_task: TaskId) {
        // Lower priority number means higher priority.
        if ctx.tasks[new_task].priority() < ctx.tasks[ctx.current].priority() {
            ctx.request_resched();
        }
    }

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        if Self::live_slice(ctx, ctx.current) <= 0 {
            ctx.request_resched();
        }
    }

    fn queued(&self) -> Vec<TaskId> {
        let mut all = self.active.tasks();
        all.extend(self.expired.tasks());
        all
    }

    fn class_stats(&self, counters: &ClassCounters) -> ClassStatsReport {
        let latency = counters.latency_stats();
        ClassStatsReport {
            class: self.name().to_string(),
            avg_latency: latency.avg,
            latency_dev: latency.dev,
            extra: vec![("array_swaps".to_string(), self.swaps as f64)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prio_array_bitmap() {
        let mut arr = PrioArray::new();
        assert!(arr.is_empty());
        arr.insert(120, TaskId(1));
        arr.insert(5, TaskId(2));
        arr.insert(120, TaskId(3));
        assert_eq!(arr.first_set(), Some(5));
        assert_eq!(arr.pop_first(), Some(TaskId(2)));
        assert_eq!(arr.first_set(), Some(120));
        assert!(arr.remove(120, TaskId(1)));
        assert_eq!(arr.pop_first(), Some(TaskId(3)));
        assert!(arr.is_empty());
    }

    #[test]
    fn test_slice_table() {
        let o1 = O1::new();
        // Real-time levels share the fixed slice.
        assert_eq!(o1.base_slice(-120), 900);
        assert_eq!(o1.base_slice(-21), 900);
        // Standard levels: round((19 - nice) * 20.4 + 5).
        assert_eq!(o1.base_slice(19), 5);
        assert_eq!(o1.base_slice(0), 393);
        assert_eq!(o1.base_slice(-20), 801);
    }
}
