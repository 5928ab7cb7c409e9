//! Task model: lifecycle state, bookkeeping, and the behaviour FSM.
//!
//! A task's scripted behaviour is a first `{priority, run, block}` spec plus
//! an ordered list of switch steps. Steps are evaluated only at pick time,
//! strictly in sequence, at most one non-final step per pick; a satisfied
//! final step turns into an exit event (the engine owns that conversion).

use serde_json::Map;

use crate::timespec::TimeValue;
use crate::types::{ClassId, EventHandle, Pid, TaskId, TimeNs, Vtime};

/// Kernel sched_prio_to_weight table from kernel/sched/core.c.
/// Maps nice levels -20..19 (indices 0..39) to scheduler weights.
pub const SCHED_PRIO_TO_WEIGHT: [u32; 40] = [
    /* -20 */ 88761, 71755, 56483, 46273, 36291, /* -15 */ 29154, 23254, 18705, 14949,
    11916, /* -10 */ 9548, 7620, 6100, 4904, 3906, /*  -5 */ 3121, 2501, 1991, 1586,
    1277, /*   0 */ 1024, 820, 655, 526, 423, /*   5 */ 335, 272, 215, 172, 137,
    /*  10 */ 110, 87, 70, 56, 45, /*  15 */ 36, 29, 23, 18, 15,
];

/// Convert a nice value (-20..=19) to a kernel scheduler weight.
pub fn nice_to_weight(nice: i64) -> u32 {
    debug_assert!((-20..=19).contains(&nice));
    SCHED_PRIO_TO_WEIGHT[(nice + 20) as usize]
}

/// Task field names owned by the kernel or by policies. `custom` keys and
/// process-modification requests must not collide with these.
pub const RESERVED_TASK_FIELDS: &[&str] = &[
    "pid",
    "pname",
    "policy",
    "alive",
    "runnable",
    "on_rq",
    "waiting",
    "current",
    "spawned",
    "exited",
    "spawn",
    "behavior",
    "enqueued_at",
    "picked_at",
    "updated_at",
    "exec_count",
    "exec_time",
    "wait_time",
    "remaining_runtime",
    "run_log",
    "latency_log",
    "exec_log",
    "current_behavior",
    "next_behavior_index",
    "next_event",
    "strict_end_event",
    "weight",
    "vruntime",
    "prev_sum_exec",
    "time_slice",
    "q_values",
];

/// The active `{priority, run, block}` triple a task runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorSpec {
    pub priority: i64,
    pub run: TimeValue,
    pub block: TimeValue,
}

/// The switch condition of a non-first behaviour entry. Evaluated only at
/// pick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchWhen {
    /// Fires once simulated time reaches the threshold.
    SimExec(TimeNs),
    /// Fires once the task's cumulative CPU time reaches the threshold.
    ProcExec(TimeNs),
    /// Fires once the task has been dispatched at least `n` times.
    ExecCount(u64),
}

impl SwitchWhen {
    /// Whether the condition holds for the given clock and task counters.
    pub fn satisfied(&self, now: TimeNs, exec_time: TimeNs, exec_count: u64) -> bool {
        match *self {
            SwitchWhen::SimExec(t) => t <= now,
            SwitchWhen::ProcExec(t) => t <= exec_time,
            SwitchWhen::ExecCount(n) => exec_count >= n,
        }
    }
}

/// A non-first behaviour entry: an update overlay or a final (exit) marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorStep {
    /// Overlay at least one of `{priority, run, block}` when `when` holds.
    Update {
        when: SwitchWhen,
        priority: Option<i64>,
        run: Option<TimeValue>,
        block: Option<TimeValue>,
    },
    /// Exit the task. `end_nicely` exits wait for the running burst; strict
    /// exits fire regardless of task state.
    Final { when: SwitchWhen, end_nicely: bool },
}

impl BehaviorStep {
    pub fn when(&self) -> &SwitchWhen {
        match self {
            BehaviorStep::Update { when, .. } | BehaviorStep::Final { when, .. } => when,
        }
    }
}

/// Policy-private per-task fields. Embedded flat on every task the way the
/// kernel's `task_struct` embeds each class's scheduling entity; each policy
/// touches only the fields it owns.
#[derive(Debug, Clone, Default)]
pub struct SchedFields {
    /// Fair: load weight derived from nice.
    pub weight: u32,
    /// Fair: virtual runtime.
    pub vruntime: Vtime,
    /// Fair: `exec_time` snapshot taken when the task was last picked.
    pub prev_sum_exec: TimeNs,
    /// Round-Robin / Linux-Original / O(n) / O(1): remaining slice.
    pub time_slice: i64,
    /// Q-learning prototype: running value estimate.
    #[cfg(feature = "qlearn")]
    pub q_value: f64,
}

/// A simulated task.
///
/// The four state booleans are kept strictly consistent by the engine and
/// the owning policy; no other actor mutates a task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub pid: Pid,
    pub pname: String,
    /// The scheduling class this task belongs to, by index. Tasks never
    /// hold a reference back to the policy.
    pub class: ClassId,

    /// True between fork and exit.
    pub alive: bool,
    /// True when ready or running (not blocked, not exited).
    pub runnable: bool,
    /// True while stored in the owning policy's runqueue.
    pub on_rq: bool,
    /// True while counted toward latency accumulation.
    pub waiting: bool,
    /// True while this task is the one the CPU executes.
    pub current: bool,

    /// Actual spawn instant (interval sampled at registration).
    pub spawned: TimeNs,
    /// Exit instant, once exited.
    pub exited: Option<TimeNs>,
    /// Instant the task last became waiting (enqueue or preemption).
    pub enqueued_at: TimeNs,
    /// Instant the task was last picked to run.
    pub picked_at: TimeNs,
    /// Instant of the last runtime-accounting update.
    pub updated_at: TimeNs,
    /// Number of times the task was picked.
    pub exec_count: u64,
    /// Cumulative CPU time consumed.
    pub exec_time: TimeNs,
    /// Cumulative time spent waiting while runnable.
    pub wait_time: TimeNs,
    /// Unconsumed portion of the current burst; carried across preemptions
    /// until it reaches zero.
    pub remaining_runtime: TimeNs,

    /// Length of every completed execution span.
    pub run_log: Vec<TimeNs>,
    /// Length of every completed waiting span.
    pub latency_log: Vec<TimeNs>,
    /// `(time, cumulative exec_time)` samples taken at every deschedule.
    pub exec_log: Vec<(TimeNs, TimeNs)>,

    /// The behaviour triple currently in force.
    pub current_behavior: BehaviorSpec,
    /// Steps not yet consumed, in order.
    pub behavior_steps: Vec<BehaviorStep>,
    /// Index of the next unconsumed step in `behavior_steps`.
    pub next_behavior_index: usize,

    /// Handle of the task's single pending lifecycle event (fork, block,
    /// enqueue, or exit), if one is scheduled.
    pub next_event: Option<EventHandle>,
    /// Handle of the unconditional strict `sim_exec` exit, if installed.
    /// May alias `next_event` when the burst runs into it.
    pub strict_end_event: Option<EventHandle>,

    /// Policy-private fields.
    pub sched: SchedFields,
    /// User-supplied opaque fields, shallow-copied from the config.
    pub custom: Map<String, serde_json::Value>,
}

impl Task {
    pub fn new(
        id: TaskId,
        pid: Pid,
        pname: String,
        class: ClassId,
        behavior: BehaviorSpec,
        steps: Vec<BehaviorStep>,
    ) -> Self {
        Task {
            id,
            pid,
            pname,
            class,
            alive: false,
            runnable: false,
            on_rq: false,
            waiting: false,
            current: false,
            spawned: 0,
            exited: None,
            enqueued_at: 0,
            picked_at: 0,
            updated_at: 0,
            exec_count: 0,
            exec_time: 0,
            wait_time: 0,
            remaining_runtime: 0,
            run_log: Vec::new(),
            latency_log: Vec::new(),
            exec_log: Vec::new(),
            current_behavior: behavior,
            behavior_steps: steps,
            next_behavior_index: 0,
            next_event: None,
            strict_end_event: None,
            sched: SchedFields::default(),
            custom: Map::new(),
        }
    }

    /// The always-alive, always-runnable idle task. Never enters a
    /// runqueue; its class is patched to the idle policy at engine init.
    pub fn idle(class: ClassId) -> Self {
        let mut t = Task::new(
            TaskId::IDLE,
            Pid(0),
            "idle".into(),
            class,
            BehaviorSpec {
                priority: 0,
                run: TimeValue::Fixed(0),
                block: TimeValue::Fixed(0),
            },
            Vec::new(),
        );
        t.alive = true;
        t.runnable = true;
        t
    }

    pub fn is_idle(&self) -> bool {
        self.id == TaskId::IDLE
    }

    /// Effective priority under the current behaviour.
    pub fn priority(&self) -> i64 {
        self.current_behavior.priority
    }

    /// The next unconsumed behaviour step, if any.
    pub fn next_step(&self) -> Option<&BehaviorStep> {
        self.behavior_steps.get(self.next_behavior_index)
    }

    /// Apply at most one pending non-final update whose condition holds.
    /// Returns true if a step was consumed.
    pub fn apply_behavior_update(&mut self, now: TimeNs) -> bool {
        let Some(&BehaviorStep::Update {
            when,
            priority,
            run,
            block,
        }) = self.next_step()
        else {
            return false;
        };
        if !when.satisfied(now, self.exec_time, self.exec_count) {
            return false;
        }
        if let Some(p) = priority {
            self.current_behavior.priority = p;
        }
        if let Some(r) = run {
            self.current_behavior.run = r;
        }
        if let Some(b) = block {
            self.current_behavior.block = b;
        }
        self.next_behavior_index += 1;
        true
    }

    /// The pending final step, if the next unconsumed step is one.
    pub fn pending_final(&self) -> Option<(SwitchWhen, bool)> {
        match self.next_step() {
            Some(&BehaviorStep::Final { when, end_nicely }) => Some((when, end_nicely)),
            _ => None,
        }
    }
}

/// The engine's task arena. Slot 0 is the idle task.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: Vec<Task>,
}

impl TaskTable {
    pub fn new() -> Self {
        TaskTable { tasks: Vec::new() }
    }

    pub fn push(&mut self, task: Task) -> TaskId {
        debug_assert_eq!(task.id.0, self.tasks.len());
        let id = task.id;
        self.tasks.push(task);
        id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn get_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.tasks.iter_mut()
    }

    /// Cumulative CPU time including the still-accruing span of a current
    /// task.
    pub fn exec_time_at(&self, id: TaskId, now: TimeNs) -> TimeNs {
        let t = self.get(id);
        if t.current {
            t.exec_time + (now - t.picked_at)
        } else {
            t.exec_time
        }
    }
}

impl std::ops::Index<TaskId> for TaskTable {
    type Output = Task;
    fn index(&self, id: TaskId) -> &Task {
        self.get(id)
    }
}

impl std::ops::IndexMut<TaskId> for TaskTable {
    fn index_mut(&mut self, id: TaskId) -> &mut Task {
        self.get_mut(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(run: TimeNs, block: TimeNs) -> BehaviorSpec {
        BehaviorSpec {
            priority: 0,
            run: TimeValue::Fixed(run),
            block: TimeValue::Fixed(block),
        }
    }

    fn task_with_steps(steps: Vec<BehaviorStep>) -> Task {
        Task::new(
            TaskId(1),
            Pid(1),
            "t".into(),
            ClassId(0),
            spec(10, 5),
            steps,
        )
    }

    #[test]
    fn test_weight_table_anchors() {
        assert_eq!(nice_to_weight(0), 1024);
        assert_eq!(nice_to_weight(-20), 88761);
        assert_eq!(nice_to_weight(19), 15);
        assert_eq!(nice_to_weight(-1), 1277);
    }

    #[test]
    fn test_update_waits_for_condition() {
        let mut t = task_with_steps(vec![BehaviorStep::Update {
            when: SwitchWhen::SimExec(100),
            priority: None,
            run: Some(TimeValue::Fixed(3)),
            block: None,
        }]);
        assert!(!t.apply_behavior_update(99));
        assert_eq!(t.current_behavior.run, TimeValue::Fixed(10));
        assert!(t.apply_behavior_update(100));
        assert_eq!(t.current_behavior.run, TimeValue::Fixed(3));
        assert_eq!(t.next_behavior_index, 1);
    }

    #[test]
    fn test_one_update_per_pick() {
        let mut t = task_with_steps(vec![
            BehaviorStep::Update {
                when: SwitchWhen::SimExec(0),
                priority: Some(5),
                run: None,
                block: None,
            },
            BehaviorStep::Update {
                when: SwitchWhen::SimExec(0),
                priority: Some(9),
                run: None,
                block: None,
            },
        ]);
        // One call consumes exactly one step even if both are satisfied.
        assert!(t.apply_behavior_update(50));
        assert_eq!(t.current_behavior.priority, 5);
        assert!(t.apply_behavior_update(50));
        assert_eq!(t.current_behavior.priority, 9);
    }

    #[test]
    fn test_proc_exec_and_exec_count_conditions() {
        let mut t = task_with_steps(vec![BehaviorStep::Update {
            when: SwitchWhen::ProcExec(40),
            priority: Some(1),
            run: None,
            block: None,
        }]);
        t.exec_time = 39;
        assert!(!t.apply_behavior_update(1_000));
        t.exec_time = 40;
        assert!(t.apply_behavior_update(1_000));

        assert!(SwitchWhen::ExecCount(3).satisfied(0, 0, 3));
        assert!(!SwitchWhen::ExecCount(3).satisfied(0, 0, 2));
    }

    #[test]
    fn test_pending_final_only_after_updates() {
        let mut t = task_with_steps(vec![
            BehaviorStep::Update {
                when: SwitchWhen::SimExec(10),
                priority: None,
                run: Some(TimeValue::Fixed(1)),
                block: None,
            },
            BehaviorStep::Final {
                when: SwitchWhen::SimExec(20),
                end_nicely: true,
            },
        ]);
        assert!(t.pending_final().is_none());
        assert!(t.apply_behavior_update(15));
        assert_eq!(
            t.pending_final(),
            Some((SwitchWhen::SimExec(20), true))
        );
    }

    #[test]
    fn test_idle_task_state() {
        let t = Task::idle(ClassId(3));
        assert!(t.alive && t.runnable && !t.on_rq && !t.waiting);
        assert!(t.is_idle());
    }
}
