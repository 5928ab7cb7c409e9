//! The original Linux scheduler (pre-2.4 era).
//!
//! A single FIFO list scanned on every pick. A task's priority doubles as
//! its time slice; when every runnable slice is exhausted a new epoch
//! recomputes `slice = round(slice / 2) + priority` across all tasks of the
//! class, so sleepers carry half their leftover slice into the next epoch.

use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{no_params, PolicyCtx, SchedPolicy};
use crate::types::TaskId;

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct Original {
    queue: VecDeque<TaskId>,
    /// Every task of this class, for epoch recomputation.
    members: Vec<TaskId>,
}

impl Original {
    pub fn new() -> Self {
        Original::default()
    }

    /// Initial slice: the priority, clamped to non-negative.
    fn base_slice(priority: i64) -> i64 {
        priority.max(0)
    }

    /// Live remaining slice of a running task.
    fn live_slice(ctx: &PolicyCtx<'_>, task: TaskId) -> i64 {
        let t = &ctx.tasks[task];
        t.sched.time_slice - (ctx.now - t.picked_at) as i64
    }

    fn recompute_epoch(&self, ctx: &mut PolicyCtx<'_>) {
        for &id in &self.members {
            let t = &mut ctx.tasks[id];
            if !t.alive {
                continue;
            }
            let slice = t.sched.time_slice;
            t.sched.time_slice = ((slice as f64) / 2.0).round() as i64 + t.priority();
        }
    }

    /// Index of the queued task with the maximum stored slice (FIFO order
    /// breaks ties).
    fn scan_max(&self, ctx: &PolicyCtx<'_>) -> Option<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (i, &id) in self.queue.iter().enumerate() {
            let slice = ctx.tasks[id].sched.time_slice;
            if best.map_or(true, |(_, s)| slice > s) {
                best = Some((i, slice));
            }
        }
        best.map(|(i, _)| i)
    }
}

impl SchedPolicy for Original {
    fn name(&self) -> &'static str {
        "original"
    }

    fn init(
        &mut self,
        ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        no_params(self.name(), params)?;
        self.queue.clear();
        self.members = members.to_vec();
        for &id in members {
            let prio = ctx.tasks[id].priority();
            ctx.tasks[id].sched.time_slice = Self::base_slice(prio);
        }
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        self.queue.push_back(task);
        ctx.tasks[task].on_rq = true;
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        let Some(pos) = self.queue.iter().position(|t| *t == task) else {
            return Err(SimError::protocol(
                ctx.now,
                format!(
                    "original: dequeue of unqueued task {:?}",
                    ctx.tasks[task].pname
                ),
            ));
        };
        self.queue.remove(pos);
        ctx.tasks[task].on_rq = false;
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> Option<TaskId> {
        if self.queue.is_empty() {
            return None;
        }
        let all_exhausted = self
            .queue
            .iter()
            .all(|&id| ctx.tasks[id].sched.time_slice <= 0);
        if all_exhausted {
            self.recompute_epoch(ctx);
        }
        let pos = self.scan_max(ctx)?;
        let task = self.queue.remove(pos).expect("scan index in bounds");
        ctx.tasks[task].on_rq = false;
        Some(task)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError> {
        let elapsed = ctx.tasks[prev].exec_time - ctx.tasks[prev].sched.prev_sum_exec;
        ctx.tasks[prev].sched.time_slice -= elapsed as i64;
        if ctx.tasks[prev].runnable {
            self.queue.push_back(prev);
            ctx.tasks[prev].on_rq = true;
        }
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _new_task: TaskId) {}

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        if Self::live_slice(ctx, ctx.current) <= 0 {
            ctx.request_resched();
        }
    }

    fn queued(&self) -> Vec<TaskId> {
        self.queue.iter().copied().collect()
    }
}
