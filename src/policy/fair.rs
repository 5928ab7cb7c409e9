//! The fair (CFS-like) policy.
//!
//! An ordered map keyed by virtual runtime. Each task's vruntime advances
//! while it runs, scaled by the standard nice→weight table, and the task
//! with the smallest vruntime runs next. `min_vruntime` tracks the floor of
//! the class and never decreases; sleepers re-enter half a scheduling
//! latency behind it so they get a modest wakeup bonus without rewinding
//! the clock for everyone else.
//!
//! The runnable load sum changes only in `enqueue`/`dequeue` and when the
//! running task leaves the runnable set, so it always covers the queued
//! tasks plus a runnable current.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::policy::{check_priority_range, parse_params, PolicyCtx, SchedPolicy};
use crate::runqueue::OrderedRunqueue;
use crate::stats::{ClassCounters, ClassStatsReport};
use crate::task::nice_to_weight;
use crate::timespec::{TimeSpec, TimeValue};
use crate::types::{TaskId, TimeNs, Vtime};

/// Weight of a nice-0 task, the scale calc_delta_fair normalises to.
const NICE_0_LOAD: u64 = 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FairParams {
    time_scale: Option<u64>,
    min_granularity: Option<TimeSpec>,
    sched_latency: Option<TimeSpec>,
    sched_wakeup_granularity: Option<TimeSpec>,
    sched_min_granularity: Option<TimeSpec>,
    start_debit: Option<bool>,
}

/// Scale `delta` by the nice-0 to task-weight ratio.
fn calc_delta_fair(delta: TimeNs, weight: u32) -> TimeNs {
    if weight as u64 == NICE_0_LOAD {
        delta
    } else {
        (delta as u128 * NICE_0_LOAD as u128 / weight as u128) as TimeNs
    }
}

#[derive(Debug)]
pub struct Fair {
    rq: OrderedRunqueue,
    /// Monotonically non-decreasing floor of the class's virtual time.
    min_vruntime: Vtime,
    /// Weight sum over runnable tasks (queued plus a runnable current).
    load: u64,
    /// Count of runnable tasks (queued plus a runnable current).
    nr_runnable: u32,
    /// The fair task currently running, if any.
    curr: Option<TaskId>,

    time_scale: u64,
    min_granularity: TimeNs,
    sched_latency: TimeNs,
    sched_wakeup_granularity: TimeNs,
    sched_min_granularity: TimeNs,
    start_debit: bool,
    /// `floor(sched_latency / sched_wakeup_granularity)`.
    sched_nr_latency: u64,
}

impl Fair {
    pub fn new() -> Self {
        let mut fair = Fair {
            rq: OrderedRunqueue::new(),
            min_vruntime: Vtime(0),
            load: 0,
            nr_runnable: 0,
            curr: None,
            time_scale: 0,
            min_granularity: 0,
            sched_latency: 0,
            sched_wakeup_granularity: 0,
            sched_min_granularity: 0,
            start_debit: false,
            sched_nr_latency: 0,
        };
        fair.apply_params(FairParams::default())
            .expect("defaults are valid");
        fair
    }

    fn apply_params(&mut self, params: FairParams) -> Result<(), ConfigError> {
        let scalar = |name: &str, spec: Option<TimeSpec>, default: TimeNs| match spec {
            None => Ok(default),
            Some(spec) => match spec.resolve(1)? {
                TimeValue::Fixed(v) if v > 0 => Ok(v),
                _ => Err(ConfigError::InvalidClassParam {
                    class: "fair".to_string(),
                    param: name.to_string(),
                    reason: "must be a positive scalar time".to_string(),
                }),
            },
        };

        let time_scale = match params.time_scale {
            None => 1_000_000,
            Some(v) if v > 0 => v,
            Some(_) => {
                return Err(ConfigError::InvalidClassParam {
                    class: "fair".to_string(),
                    param: "time_scale".to_string(),
                    reason: "must be positive".to_string(),
                })
            }
        };
        self.time_scale = time_scale;
        self.min_granularity = scalar("min_granularity", params.min_granularity, time_scale)?;
        self.sched_latency = scalar("sched_latency", params.sched_latency, 8 * time_scale)?;
        self.sched_wakeup_granularity = scalar(
            "sched_wakeup_granularity",
            params.sched_wakeup_granularity,
            time_scale,
        )?;
        self.sched_min_granularity = scalar(
            "sched_min_granularity",
            params.sched_min_granularity,
            time_scale,
        )?;
        self.start_debit = params.start_debit.unwrap_or(false);
        self.sched_nr_latency = self.sched_latency / self.sched_wakeup_granularity;
        Ok(())
    }

    /// Targeted latency for the current number of runnable tasks: stretch
    /// the period once there are too many for the base latency window.
    fn sched_period(&self, nr_running: u32) -> TimeNs {
        if nr_running as u64 > self.sched_nr_latency {
            nr_running as TimeNs * self.min_granularity
        } else {
            self.sched_latency
        }
    }

    /// The task's weighted share of the period, in wall-clock ns.
    fn sched_slice(&self, weight: u32) -> TimeNs {
        let period = self.sched_period(self.nr_runnable.max(1));
        if self.load == 0 {
            return period;
        }
        (period as u128 * weight as u128 / self.load as u128) as TimeNs
    }

    /// The slice expressed in the task's virtual time.
    fn sched_vslice(&self, weight: u32) -> TimeNs {
        calc_delta_fair(self.sched_slice(weight), weight)
    }

    /// Fold the running span since the last update into `curr`'s vruntime.
    fn account(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        let t = &mut ctx.tasks[task];
        let delta = ctx.now.saturating_sub(t.updated_at);
        if delta > 0 {
            let d = calc_delta_fair(delta, t.sched.weight);
            t.sched.vruntime = Vtime(t.sched.vruntime.0.wrapping_add(d));
            t.updated_at = ctx.now;
        }
    }

    fn update_curr(&mut self, ctx: &mut PolicyCtx<'_>) {
        if let Some(c) = self.curr {
            self.account(ctx, c);
        }
        self.update_min_vruntime(ctx);
    }

    /// Advance `min_vruntime` toward the smallest runnable vruntime,
    /// never backwards.
    fn update_min_vruntime(&mut self, ctx: &PolicyCtx<'_>) {
        let mut vr = self.min_vruntime;
        if let Some(c) = self.curr {
            if ctx.tasks[c].runnable {
                vr = ctx.tasks[c].sched.vruntime;
            }
        }
        if let Some((key, _)) = self.rq.min() {
            let leftmost = Vtime(key);
            if leftmost < vr {
                vr = leftmost;
            }
        }
        if vr > self.min_vruntime {
            self.min_vruntime = vr;
        }
    }

    /// Drop a no-longer-runnable current task from the runnable set.
    fn deactivate_blocked_curr(&mut self, ctx: &PolicyCtx<'_>) {
        if let Some(c) = self.curr {
            if !ctx.tasks[c].runnable {
                self.load = self.load.saturating_sub(ctx.tasks[c].sched.weight as u64);
                self.nr_runnable -= 1;
                self.curr = None;
            }
        }
    }

    fn insert(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) {
        self.rq.insert(ctx.tasks[task].sched.vruntime.0, task);
        ctx.tasks[task].on_rq = true;
    }
}

impl Default for Fair {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for Fair {
    fn name(&self) -> &'static str {
        "fair"
    }

    fn init(
        &mut self,
        ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        members: &[TaskId],
    ) -> Result<(), ConfigError> {
        let params: FairParams = parse_params(self.name(), params)?;
        self.apply_params(params)?;
        check_priority_range(self.name(), ctx, members, -20, 19)?;
        self.rq.clear();
        self.min_vruntime = Vtime(0);
        self.load = 0;
        self.nr_runnable = 0;
        self.curr = None;
        for &id in members {
            let t = &mut ctx.tasks[id];
            t.sched.weight = nice_to_weight(t.current_behavior.priority);
            t.sched.vruntime = Vtime(0);
            t.sched.prev_sum_exec = 0;
        }
        Ok(())
    }

    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        self.update_curr(ctx);

        // Behaviour updates may have changed the nice value since init.
        let nice = ctx.tasks[task].priority();
        let weight = nice_to_weight(nice);
        ctx.tasks[task].sched.weight = weight;
        self.load += weight as u64;
        self.nr_runnable += 1;

        let place = if ctx.tasks[task].exec_count == 0 {
            // New task: optionally debit one vslice so it does not get a
            // whole latency window ahead of the pack.
            let debit = if self.start_debit {
                self.sched_vslice(weight)
            } else {
                0
            };
            Vtime(self.min_vruntime.0.wrapping_add(debit))
        } else {
            // Waking task: gentle-sleepers bonus, half a latency window.
            Vtime(self.min_vruntime.0.saturating_sub(self.sched_latency / 2))
        };
        let t = &mut ctx.tasks[task];
        if place > t.sched.vruntime {
            t.sched.vruntime = place;
        }

        self.insert(ctx, task);
        Ok(())
    }

    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError> {
        self.update_curr(ctx);
        let key = ctx.tasks[task].sched.vruntime.0;
        if !self.rq.remove(key, task) {
            return Err(SimError::invariant(
                ctx.now,
                format!(
                    "fair: task {:?} not stored under its vruntime {key}",
                    ctx.tasks[task].pname
                ),
            ));
        }
        ctx.tasks[task].on_rq = false;
        self.load = self
            .load
            .saturating_sub(ctx.tasks[task].sched.weight as u64);
        self.nr_runnable -= 1;
        self.update_min_vruntime(ctx);
        Ok(())
    }

    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Option<TaskId> {
        self.update_curr(ctx);
        self.deactivate_blocked_curr(ctx);

        if let Some((_, task)) = self.rq.pop_min() {
            ctx.tasks[task].on_rq = false;
            // Open a fresh accounting span; the engine stamps the same
            // instant when it finalises the switch.
            ctx.tasks[task].updated_at = ctx.now;
            self.curr = Some(task);
            return Some(task);
        }
        // Empty tree: keep running the current fair task if it still can.
        if let Some(c) = self.curr {
            if ctx.tasks[c].runnable && c == prev {
                return Some(c);
            }
        }
        None
    }

    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError> {
        if self.curr == Some(prev) {
            // Fair was not asked during this dispatch (a higher class won);
            // close the accounting span now.
            self.account(ctx, prev);
            self.curr = None;
            if ctx.tasks[prev].runnable {
                self.insert(ctx, prev);
            } else {
                self.load = self.load.saturating_sub(ctx.tasks[prev].sched.weight as u64);
                self.nr_runnable -= 1;
            }
            self.update_min_vruntime(ctx);
        } else if ctx.tasks[prev].runnable && !ctx.tasks[prev].on_rq {
            // Fair already accounted the span when it picked the successor.
            self.insert(ctx, prev);
            self.update_min_vruntime(ctx);
        }
        Ok(())
    }

    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, new_task: TaskId) {
        self.update_curr(ctx);
        let curr_vr = ctx.tasks[ctx.current].sched.vruntime;
        let new_vr = ctx.tasks[new_task].sched.vruntime;
        let vdiff = curr_vr.0.wrapping_sub(new_vr.0) as i64;
        let gran =
            calc_delta_fair(self.sched_wakeup_granularity, ctx.tasks[new_task].sched.weight);
        if vdiff > gran as i64 {
            ctx.request_resched();
        }
    }

    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>) {
        self.update_curr(ctx);
        let current = ctx.current;
        let delta_exec = ctx.tasks.exec_time_at(current, ctx.now)
            - ctx.tasks[current].sched.prev_sum_exec;
        let ideal = self.sched_slice(ctx.tasks[current].sched.weight);
        if delta_exec > ideal {
            ctx.request_resched();
            return;
        }
        if delta_exec < self.sched_min_granularity {
            return;
        }
        if let Some((key, _)) = self.rq.min() {
            let behind = ctx.tasks[current].sched.vruntime.0.wrapping_sub(key) as i64;
            if behind > ideal as i64 {
                ctx.request_resched();
            }
        }
    }

    fn queued(&self) -> Vec<TaskId> {
        self.rq.iter().map(|(_, t)| t).collect()
    }

    fn class_stats(&self, counters: &ClassCounters) -> ClassStatsReport {
        let latency = counters.latency_stats();
        ClassStatsReport {
            class: self.name().to_string(),
            avg_latency: latency.avg,
            latency_dev: latency.dev,
            extra: vec![("min_vruntime".to_string(), self.min_vruntime.0 as f64)],
        }
    }
}
