//! First-come-first-served.
//!
//! A plain FIFO list, no priorities, no preemption of its own. A task
//! preempted by a higher class resumes at the head so arrival order is
//! preserved.

use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{no_params, PolicyCtx, SchedPolicy};
use crate::types::TaskId;

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct Fcfs {
    queue: VecDeque<TaskId>,
}

impl Fcfs {
    pub fn new() -> Self {
        Fcfs::default()
    }
}

impl SchedPolicy for Fcfs {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn init(
        &mut self,
        _ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        no_params(self.name(), params)?;
        self.queue.clear();
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
                format!("fcfs: dequeue of unqueued task {:?}", ctx.tasks[task].pname),
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
        if ctx.tasks[prev].runnable {
            self.queue.push_front(prev);
            ctx.tasks[prev].on_rq = true;
        }
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _new_task: TaskId) {}

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}

    fn queued(&self) -> Vec<TaskId> {
        self.queue.iter().copied().collect()
    }
}
