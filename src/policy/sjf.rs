//! Shortest-job-first, optionally preemptive (SRTF).
//!
//! Ordered map keyed by remaining runtime. A just-woken task has no burst
//! yet, so enqueue synthesises one from the current behaviour. This is the
//! policy's acknowledged cheat: a behaviour update firing at the next pick
//! may change the burst the key was computed from.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{parse_params, PolicyCtx, SchedPolicy};
use crate::runqueue::OrderedRunqueue;
use crate::types::TaskId;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SjfParams {
    early_preemption: Option<bool>,
}

#[derive(Debug, Default)]
pub struct Sjf {
    rq: OrderedRunqueue,
    early_preemption: bool,
}

impl Sjf {
    pub fn new() -> Self {
        Sjf::default()
    }
}

impl SchedPolicy for Sjf {
    fn name(&self) -> &'static str {
        "sjf"
    }

    fn init(
        &mut self,
        _ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: SjfParams = parse_params(self.name(), params)?;
        self.early_preemption = params.early_preemption.unwrap_or(false);
        self.rq.clear();
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        if ctx.tasks[task].remaining_runtime == 0 {
            let run = ctx.tasks[task].current_behavior.run;
            ctx.tasks[task].remaining_runtime = run.sample(ctx.rng);
        }
        self.rq.insert(ctx.tasks[task].remaining_runtime, task);
        ctx.tasks[task].on_rq = true;
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        let key = ctx.tasks[task].remaining_runtime;
        if !self.rq.remove(key, task) {
            return Err(SimError::invariant(
                ctx.now,
                format!(
                    "sjf: task {:?} not stored under its key {key}",
                    ctx.tasks[task].pname
                ),
            ));
        }
        ctx.tasks[task].on_rq = false;
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> Option<TaskId> {
        let (_, task) = self.rq.pop_min()?;
        ctx.tasks[task].on_rq = false;
        Some(task)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError> {
        if ctx.tasks[prev].runnable {
            self.rq.insert(ctx.tasks[prev].remaining_runtime, prev);
            ctx.tasks[prev].on_rq = true;
        }
        Ok(())
    }

    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, new_task: TaskId) {
        if !self.early_preemption {
            return;
        }
        // Compare against the current task's live remaining runtime; its
        // stored value is only updated at deschedule.
        let current = ctx.current;
        let ran = ctx.now - ctx.tasks[current].picked_at;
        let current_remaining = ctx.tasks[current].remaining_runtime.saturating_sub(ran);
        if ctx.tasks[new_task].remaining_runtime < current_remaining {
            ctx.request_resched();
        }
    }

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}

    fn queued(&self) -> Vec<TaskId> {
        self.rq.iter().map(|(_, t)| t).collect()
    }
}
