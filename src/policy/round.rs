//! Round-Robin.
//!
//! FIFO list plus a single configurable time slice. Every enqueue grants a
//! fresh slice; the tick decrements it and requests a dispatch on
//! exhaustion, at which point the task rotates to the tail.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{parse_params, PolicyCtx, SchedPolicy};
use crate::timespec::{TimeSpec, TimeValue};
use crate::types::{TaskId, TimeNs};

use std::collections::VecDeque;

/// Default slice when `class_params` gives none: 1000 ns.
const DEFAULT_TIME_SLICE: TimeNs = 1_000;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoundParams {
    time_slice: Option<TimeSpec>,
}

#[derive(Debug)]
pub struct Round {
    queue: VecDeque<TaskId>,
    time_slice: TimeNs,
}

impl Round {
    pub fn new() -> Self {
        Round {
            queue: VecDeque::new(),
            time_slice: DEFAULT_TIME_SLICE,
        }
    }

    fn grant_slice(&self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        ctx.tasks[task].sched.time_slice = self.time_slice as i64;
    }
}

impl Default for Round {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for Round {
    fn name(&self) -> &'static str {
        "round"
    }

    fn init(
        &mut self,
        _ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: RoundParams = parse_params(self.name(), params)?;
        self.time_slice = match params.time_slice {
            None => DEFAULT_TIME_SLICE,
            Some(spec) => match spec.resolve(1)? {
                TimeValue::Fixed(v) if v > 0 => v,
                _ => {
                    return Err(ConfigError::InvalidClassParam {
                        class: self.name().to_string(),
                        param: "time_slice".to_string(),
                        reason: "must be a positive scalar time".to_string(),
                    })
                }
            },
        };
        self.queue.clear();
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        self.grant_slice(ctx, task);
        self.queue.push_back(task);
        ctx.tasks[task].on_rq = true;
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        let Some(pos) = self.queue.iter().position(|t| *t == task) else {
            return Err(SimError::protocol(
                ctx.now,
                format!("round: dequeue of unqueued task {:?}", ctx.tasks[task].pname),
            ));
        };
        self.queue.remove(pos);
        ctx.tasks[task].on_rq = false;
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> Option<TaskId> {
        let head = self.queue.pop_front()?;
        ctx.tasks[head].on_rq = false;
        Some(head)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError> {
        // A preempted task rotates to the tail with a fresh slice.
        if ctx.tasks[prev].runnable {
            self.grant_slice(ctx, prev);
            self.queue.push_back(prev);
            ctx.tasks[prev].on_rq = true;
        }
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _new_task: TaskId) {}

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        let current = ctx.current;
        let tick = ctx.timer_tick_len as i64;
        ctx.tasks[current].sched.time_slice -= tick;
        if ctx.tasks[current].sched.time_slice <= 0 {
            ctx.request_resched();
        }
    }

    fn queued(&self) -> Vec<TaskId> {
        self.queue.iter().copied().collect()
    }
}
