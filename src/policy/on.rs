//! The Linux 2.4 O(n) scheduler.
//!
//! Same shape as the original scheduler, with Unix nice values: slices are
//! `(20 - nice) * 2 * time_scale`, selection scans for the best *goodness*
//! `slice + 20 - nice`, and the epoch recompute is
//! `round(slice / 2) + (20 - nice) * 2 * time_scale`.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{check_priority_range, parse_params, PolicyCtx, SchedPolicy};
use crate::types::TaskId;

use std::collections::VecDeque;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OnParams {
    time_scale: Option<u64>,
}

#[derive(Debug)]
pub struct On {
    queue: VecDeque<TaskId>,
    members: Vec<TaskId>,
    time_scale: u64,
}

impl On {
    pub fn new() -> Self {
        On {
            queue: VecDeque::new(),
            members: Vec::new(),
            time_scale: 1,
        }
    }

    fn base_slice(&self, nice: i64) -> i64 {
        (20 - nice) * 2 * self.time_scale as i64
    }

    fn goodness(ctx: &PolicyCtx<'_>, task: TaskId) -> i64 {
        let t = &ctx.tasks[task];
        t.sched.time_slice + 20 - t.priority()
    }

    fn live_slice(ctx: &PolicyCtx<'_>, task: TaskId) -> i64 {
        let t = &ctx.tasks[task];
        t.sched.time_slice - (ctx.now - t.picked_at) as i64
    }

    fn recompute_epoch(&self, ctx: &mut PolicyCtx<'_>) {
        for &id in &self.members {
            let t = &ctx.tasks[id];
            if !t.alive {
                continue;
            }
            let refresh = self.base_slice(t.priority());
            let t = &mut ctx.tasks[id];
            t.sched.time_slice = ((t.sched.time_slice as f64) / 2.0).round() as i64 + refresh;
        }
    }
}

impl Default for On {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for On {
    fn name(&self) -> &'static str {
        "on"
    }

    fn init(
        &mut self,
        ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: OnParams = parse_params(self.name(), params)?;
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
        check_priority_range(self.name(), ctx, members, -20, 19)?;
        self.queue.clear();
        self.members = members.to_vec();
        for &id in members {
            let prio = ctx.tasks[id].priority();
            ctx.tasks[id].sched.time_slice = self.base_slice(prio);
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
                format!("on: dequeue of unqueued task {:?}", ctx.tasks[task].pname),
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
        let mut best: Option<(usize, i64)> = None;
        for (i, &id) in self.queue.iter().enumerate() {
            let g = Self::goodness(ctx, id);
            if best.map_or(true, |(_, bg)| g > bg) {
                best = Some((i, g));
            }
        }
        let pos = best.map(|(i, _)| i)?;
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
