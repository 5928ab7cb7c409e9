//! Experimental Q-learning policy.
//!
//! Keeps a FIFO list like FCFS but picks with an ε-greedy rule over a
//! per-task value estimate: tasks whose recent dispatches led to short
//! class-wide waits score higher. The reward on every deschedule is the
//! negative of the wait the task accumulated before it ran, so the policy
//! gradually prefers tasks that keep the queue moving.
//!
//! Semantics are under-specified and the numbers have not been tuned;
//! compiled in only with the `qlearn` feature.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{parse_params, PolicyCtx, SchedPolicy};
use crate::types::TaskId;

use rand::Rng;
use std::collections::VecDeque;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct QLearnParams {
    /// Exploration rate, 0..=1. Default 0.1.
    epsilon: Option<f64>,
    /// Learning rate, 0..=1. Default 0.5.
    alpha: Option<f64>,
}

#[derive(Debug)]
pub struct QLearn {
    queue: VecDeque<TaskId>,
    epsilon: f64,
    alpha: f64,
}

impl QLearn {
    pub fn new() -> Self {
        QLearn {
            queue: VecDeque::new(),
            epsilon: 0.1,
            alpha: 0.5,
        }
    }

    fn unit_param(
        &self,
        name: &str,
        value: Option<f64>,
        default: f64,
    ) -> Result<f64, ConfigError> {
        let v = value.unwrap_or(default);
        if (0.0..=1.0).contains(&v) {
            Ok(v)
        } else {
            Err(ConfigError::InvalidClassParam {
                class: "qlearn".to_string(),
                param: name.to_string(),
                reason: "must lie in [0, 1]".to_string(),
            })
        }
    }
}

impl Default for QLearn {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for QLearn {
    fn name(&self) -> &'static str {
        "qlearn"
    }

    fn init(
        &mut self,
        ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: QLearnParams = parse_params(self.name(), params)?;
        self.epsilon = self.unit_param("epsilon", params.epsilon, 0.1)?;
        self.alpha = self.unit_param("alpha", params.alpha, 0.5)?;
        self.queue.clear();
        for &id in members {
            ctx.tasks[id].sched.q_value = 0.0;
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
                    "qlearn: dequeue of unqueued task {:?}",
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
        let pos = if ctx.rng.gen_range(0.0..1.0) < self.epsilon {
            ctx.rng.gen_range(0..self.queue.len())
        } else {
            let mut best = 0;
            for (i, &id) in self.queue.iter().enumerate() {
                if ctx.tasks[id].sched.q_value > ctx.tasks[self.queue[best]].sched.q_value {
                    best = i;
                }
            }
            best
        };
        let task = self.queue.remove(pos)?;
        ctx.tasks[task].on_rq = false;
        Some(task)
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError> {
        // Reward: the shorter the wait that preceded this dispatch, the
        // better the choice looked in hindsight.
        let waited = ctx.tasks[prev].picked_at.saturating_sub(ctx.tasks[prev].enqueued_at);
        let reward = -(waited as f64);
        let q = &mut ctx.tasks[prev].sched.q_value;
        *q += self.alpha * (reward - *q);

        if ctx.tasks[prev].runnable {
            self.queue.push_back(prev);
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
