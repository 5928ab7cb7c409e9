//! The scheduling-policy protocol and the built-in policy set.
//!
//! Policies are the only runtime-polymorphic objects in the engine. Each one
//! owns its runqueue and its private task fields and is driven exclusively
//! through the dispatch protocol below; the engine mediates every call and
//! owns the task table, the RNG and the reschedule flag, handed in through
//! [`PolicyCtx`].
//!
//! Re-entrancy is excluded by construction: `task_tick` and `check_preempt`
//! request a reschedule by setting the context flag, and the engine performs
//! it at the next natural boundary.

use rand::rngs::SmallRng;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConfigError, SimError};
use crate::stats::{ClassCounters, ClassStatsReport};
use crate::task::TaskTable;
use crate::types::{TaskId, TimeNs};

pub mod fair;
pub mod fcfs;
pub mod idle;
pub mod o1;
pub mod on;
pub mod original;
#[cfg(feature = "qlearn")]
pub mod qlearn;
pub mod round;
pub mod sjf;

/// Everything a policy may touch during one protocol call.
///
/// The engine constructs this from disjoint fields of itself, so a policy
/// can mutate tasks and draw randomness while the policy table itself stays
/// uniquely borrowed.
pub struct PolicyCtx<'a> {
    /// The simulated clock.
    pub now: TimeNs,
    /// The task arena. Policies only mutate their own tasks.
    pub tasks: &'a mut TaskTable,
    /// The run's seeded RNG; all interval samples draw from it.
    pub rng: &'a mut SmallRng,
    /// Set to request a dispatch at the next event-loop boundary.
    resched: &'a mut bool,
    /// The task currently executing.
    pub current: TaskId,
    /// Length of the periodic scheduler tick.
    pub timer_tick_len: TimeNs,
}

impl<'a> PolicyCtx<'a> {
    pub fn new(
        now: TimeNs,
        tasks: &'a mut TaskTable,
        rng: &'a mut SmallRng,
        resched: &'a mut bool,
        current: TaskId,
        timer_tick_len: TimeNs,
    ) -> Self {
        PolicyCtx {
            now,
            tasks,
            rng,
            resched,
            current,
            timer_tick_len,
        }
    }

    /// Ask the engine for a dispatch at the next natural boundary.
    pub fn request_resched(&mut self) {
        *self.resched = true;
    }
}

/// The six-method dispatch protocol every scheduling class satisfies.
///
/// Mutating calls return `Err` only for protocol or invariant violations,
/// which are fatal for the run.
pub trait SchedPolicy {
    /// The class name tasks reference in configurations.
    fn name(&self) -> &'static str;

    /// Reset internal state, validate `params`, and install policy-private
    /// fields on every member task.
    fn init(
        &mut self,
        ctx: &mut PolicyCtx<'_>,
        params: Option<&Value>,
        members: &[TaskId],
    ) -> Result<(), ConfigError>;

    /// The task became runnable and joins this runqueue. The policy sets
    /// `on_rq` as part of insertion.
    fn enqueue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError>;

    /// The task leaves the runqueue for any reason (block, exit).
    fn dequeue(&mut self, ctx: &mut PolicyCtx<'_>, task: TaskId) -> Result<(), SimError>;

    /// Select the next task of this class, or none. `prev` is the task
    /// being descheduled; the engine invokes `put_prev` on `prev`'s policy
    /// exactly once iff some policy returned a task other than `prev`.
    fn pick_next(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Option<TaskId>;

    /// Finalise bookkeeping for the just-descheduled `prev` (slice
    /// decrement, re-enqueue if still runnable, runtime accounting).
    fn put_prev(&mut self, ctx: &mut PolicyCtx<'_>, prev: TaskId) -> Result<(), SimError>;

    /// `new_task` became runnable while a task of this same class runs.
    /// May request a reschedule through the context.
    fn check_preempt(&mut self, ctx: &mut PolicyCtx<'_>, new_task: TaskId);

    /// Periodic scheduler tick while a task of this class runs.
    fn task_tick(&mut self, ctx: &mut PolicyCtx<'_>);

    /// Tasks currently stored in this policy's runqueue, in queue order.
    /// Used by protocol checks and invariant tests, not by dispatch.
    fn queued(&self) -> Vec<TaskId>;

    /// Per-class statistics for the result object. The default reports the
    /// latency rollup every class carries.
    fn class_stats(&self, counters: &ClassCounters) -> ClassStatsReport {
        let latency = counters.latency_stats();
        ClassStatsReport {
            class: self.name().to_string(),
            avg_latency: latency.avg,
            latency_dev: latency.dev,
            extra: Vec::new(),
        }
    }
}

/// Deserialize a policy's `class_params` object, rejecting unknown keys.
pub(crate) fn parse_params<T: DeserializeOwned + Default>(
    class: &str,
    params: Option<&Value>,
) -> Result<T, ConfigError> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidClassParam {
                class: class.to_string(),
                param: "class_params".to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Reject any `class_params` for policies that take none.
pub(crate) fn no_params(class: &str, params: Option<&Value>) -> Result<(), ConfigError> {
    match params {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(map)) if map.is_empty() => Ok(()),
        Some(_) => Err(ConfigError::InvalidClassParam {
            class: class.to_string(),
            param: "class_params".to_string(),
            reason: "this policy takes no parameters".to_string(),
        }),
    }
}

/// Validate that every member's priority lies in `min..=max`, including
/// priorities a behaviour update will install later.
pub(crate) fn check_priority_range(
    class: &str,
    ctx: &PolicyCtx<'_>,
    members: &[TaskId],
    min: i64,
    max: i64,
) -> Result<(), ConfigError> {
    let out_of_range = |value: i64| ConfigError::PriorityOutOfRange {
        class: class.to_string(),
        value,
        min,
        max,
    };
    for &id in members {
        let task = &ctx.tasks[id];
        let prio = task.priority();
        if !(min..=max).contains(&prio) {
            return Err(out_of_range(prio));
        }
        for step in &task.behavior_steps {
            if let crate::task::BehaviorStep::Update {
                priority: Some(p), ..
            } = step
            {
                if !(min..=max).contains(p) {
                    return Err(out_of_range(*p));
                }
            }
        }
    }
    Ok(())
}

/// A constructor for one registered policy.
pub type PolicyFactory = fn() -> Box<dyn SchedPolicy>;

/// The built-in policy set, in default registration (priority) order.
/// Newly registered policies append behind these; the idle policy is not
/// part of the set; the engine always keeps it at the very end.
pub fn builtin_policies() -> Vec<(&'static str, PolicyFactory)> {
    #[allow(unused_mut)]
    let mut set: Vec<(&'static str, PolicyFactory)> = vec![
        ("fcfs", || Box::new(fcfs::Fcfs::new())),
        ("round", || Box::new(round::Round::new())),
        ("sjf", || Box::new(sjf::Sjf::new())),
        ("original", || Box::new(original::Original::new())),
        ("on", || Box::new(on::On::new())),
        ("o1", || Box::new(o1::O1::new())),
        ("fair", || Box::new(fair::Fair::new())),
    ];
    #[cfg(feature = "qlearn")]
    set.push(("qlearn", || Box::new(qlearn::QLearn::new())));
    set
}
