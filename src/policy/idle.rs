//! The idle policy.
//!
//! A single-task "runqueue": `pick_next` always offers the idle task, so a
//! dispatch that reaches the end of the priority order still returns a
//! task and the `put_prev` protocol fires exactly once. The idle task is
//! never enqueued anywhere; attempts to queue it are engine bugs.

use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{PolicyCtx, SchedPolicy};
use crate::types::TaskId;

#[derive(Debug, Default)]
pub struct Idle;

impl Idle {
    pub fn new() -> Self {
        Idle
    }
}

impl SchedPolicy for Idle {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn init(
        &mut self,
        _ctx: &mut PolicyCtx<'_>,
        _params: Option<&Value>,
        _members: &[TaskId],
    ) -> Result<(), ConfigError> {
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, _task: TaskId) -> Result<(), SimError> {
        Err(SimError::protocol(
            ctx.now,
            "idle: the idle task is never enqueued",
        ))
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, _task: TaskId) -> Result<(), SimError> {
        Err(SimError::protocol(
            ctx.now,
            "idle: the idle task is never dequeued",
        ))
    }

    fn pick_next(&mut self, _ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> Option<TaskId> {
        Some(TaskId::IDLE)
    }

    fn put_prev(&mut self, _ctx: &mut PolicyCtx<'_>, _prev: TaskId) -> Result<(), SimError> {
        Ok(())
    }

    fn check_preempt(&mut self, _ctx: &mut PolicyCtx<'_>, _new_task: TaskId) {}

    fn task_tick(&mut self, _ctx: &mut PolicyCtx<'_>) {}

    fn queued(&self) -> Vec<TaskId> {
        Vec::new()
    }
}
