//! The scheduler kernel: event loop, dispatch, preemption, statistics.
//!
//! The engine owns the clock, the event queue, the task table, and the
//! priority-ordered policy stack, and mediates every call between them.
//! Policies never call back into the engine; `task_tick` and
//! `check_preempt` request a dispatch through the context flag and the
//! engine performs it once the current event handler has returned.
//!
//! A dispatch asks each policy in priority order for `pick_next`; the first
//! taker wins and `put_prev` fires on the previous task's policy exactly
//! once iff the winner differs from it. When every real policy passes but
//! the previous task can still run, the kernel re-picks it, so idle only
//! runs when nothing is runnable.

use std::collections::HashMap;
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::SimConfig;
use crate::error::{ConfigError, SimError};
use crate::event::{Event, EventKind, EventQueue, ExitCause};
use crate::fmt::FmtN;
use crate::policy::{builtin_policies, PolicyCtx, SchedPolicy};
use crate::stats::{
    AvgDev, ClassCounters, ClassLatency, DistributionStats, LatencyReport, MultiRunResult,
    ProcessSnapshot, ProcessStats, SimResult, TurnaroundReport,
};
use crate::task::{SwitchWhen, Task, TaskTable};
use crate::trace::{SimEventKind, Trace};
use crate::types::{ClassId, Pid, TaskId, TimeNs};

/// How far one `Engine` call executes.
#[derive(Debug, Clone, Copy)]
enum RunMode {
    ToCompletion,
    Until(TimeNs),
    Steps(usize),
}

/// A registered policy: its name plus the constructor used per run.
struct Registered {
    name: String,
    factory: Box<dyn Fn() -> Box<dyn SchedPolicy>>,
}

/// The simulation engine. Holds the registered policy set across runs;
/// everything else lives in the per-run state and is replaced by `init`.
pub struct Engine {
    registry: Vec<Registered>,
    run: Option<RunState>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the built-in policy set registered.
    pub fn new() -> Self {
        let registry = builtin_policies()
            .into_iter()
            .map(|(name, factory)| Registered {
                name: name.to_string(),
                factory: Box::new(factory),
            })
            .collect();
        Engine {
            registry,
            run: None,
        }
    }

    /// Registered policy names, in priority order. This is the name set
    /// configurations are validated against.
    pub fn policy_names(&self) -> Vec<String> {
        self.registry.iter().map(|r| r.name.clone()).collect()
    }

    /// Register an additional policy at the tail of the priority order.
    pub fn register_policy(
        &mut self,
        name: &str,
        factory: Box<dyn Fn() -> Box<dyn SchedPolicy>>,
    ) -> Result<(), ConfigError> {
        if self.registry.iter().any(|r| r.name == name) {
            return Err(ConfigError::Invalid(format!(
                "policy {name:?} is already registered"
            )));
        }
        self.registry.push(Registered {
            name: name.to_string(),
            factory,
        });
        Ok(())
    }

    /// Permute the registered priority order. `perm[i]` names the old
    /// index that moves to position `i`.
    pub fn reorder_registered(&mut self, perm: &[usize]) -> Result<(), ConfigError> {
        check_permutation(perm, self.registry.len())?;
        let mut old: Vec<Option<Registered>> = self.registry.drain(..).map(Some).collect();
        self.registry = perm
            .iter()
            .map(|&i| old[i].take().expect("valid permutation"))
            .collect();
        Ok(())
    }

    /// Permute the active priority order of the current run. The idle
    /// policy stays pinned at the end.
    pub fn reorder_active(&mut self, perm: &[usize]) -> Result<(), SimError> {
        let run = self.run.as_mut().ok_or(SimError::NoRun)?;
        run.reorder(perm)?;
        Ok(())
    }

    /// Prepare a run. Idempotently replaces any prior run state.
    pub fn init(&mut self, config: SimConfig) -> Result<(), SimError> {
        let rng = SmallRng::seed_from_u64(config.seed);
        self.init_with_rng(config, rng)
    }

    fn init_with_rng(&mut self, config: SimConfig, rng: SmallRng) -> Result<(), SimError> {
        self.run = None;
        self.run = Some(RunState::build(config, rng, &self.registry)?);
        Ok(())
    }

    /// Parse, validate, and initialise from a JSON document.
    pub fn load_json(&mut self, text: &str) -> Result<(), SimError> {
        let config = SimConfig::from_json(text, &self.policy_names())?;
        self.init(config)
    }

    /// Execute to completion and return the finished result.
    pub fn run(&mut self) -> Result<SimResult, SimError> {
        let run = self.run.as_mut().ok_or(SimError::NoRun)?;
        run.run_loop(RunMode::ToCompletion)
    }

    /// Execute until simulated time `t`; partial results carry no
    /// aggregate statistics.
    pub fn run_until(&mut self, t: TimeNs) -> Result<SimResult, SimError> {
        let run = self.run.as_mut().ok_or(SimError::NoRun)?;
        run.run_loop(RunMode::Until(t))
    }

    /// Execute `n` steps, where a step consumes all events at one
    /// timestamp.
    pub fn step(&mut self, n: usize) -> Result<SimResult, SimError> {
        let run = self.run.as_mut().ok_or(SimError::NoRun)?;
        run.run_loop(RunMode::Steps(n))
    }

    /// Abort an in-progress run; the engine returns to the no-run state.
    pub fn break_run(&mut self) {
        self.run = None;
    }

    /// Snapshot of the current run, finished or not. `None` without a run.
    pub fn partial_result(&self) -> Option<SimResult> {
        self.run.as_ref().map(|run| run.build_result(false))
    }

    /// Execute `n` independent runs of one configuration and reduce the
    /// aggregates. The RNG either reseeds per run (`seed + run_index`) or
    /// continues its stream, per the configuration knob.
    pub fn multi_run(&mut self, config: SimConfig, n: usize) -> Result<MultiRunResult, SimError> {
        let mut results = Vec::with_capacity(n);
        let mut carried: Option<SmallRng> = None;
        for i in 0..n {
            let mut cfg = config.clone();
            let rng = if cfg.reseed_per_run {
                cfg.seed = config.seed.wrapping_add(i as u64);
                SmallRng::seed_from_u64(cfg.seed)
            } else {
                carried
                    .take()
                    .unwrap_or_else(|| SmallRng::seed_from_u64(cfg.seed))
            };
            self.init_with_rng(cfg, rng)?;
            let result = {
                let run = self.run.as_mut().expect("just initialised");
                run.run_loop(RunMode::ToCompletion)?
            };
            results.push(result);
            if !config.reseed_per_run {
                carried = self.run.take().map(|r| r.rng);
            }
        }
        Ok(MultiRunResult::reduce(&config.name, &results))
    }
}

fn check_permutation(perm: &[usize], len: usize) -> Result<(), ConfigError> {
    if perm.len() != len {
        return Err(ConfigError::Invalid(format!(
            "permutation has {} entries, expected {len}",
            perm.len()
        )));
    }
    let mut seen = vec![false; len];
    for &i in perm {
        if i >= len || seen[i] {
            return Err(ConfigError::Invalid(format!(
                "invalid permutation entry {i}"
            )));
        }
        seen[i] = true;
    }
    Ok(())
}

/// Everything that belongs to one run.
struct RunState {
    config: SimConfig,
    clock: TimeNs,
    queue: EventQueue,
    tasks: TaskTable,
    /// Active policies in priority order; the idle policy is always last.
    policies: Vec<Box<dyn SchedPolicy>>,
    class_names: Vec<String>,
    counters: Vec<ClassCounters>,
    /// Classes referenced by at least one task (indices into `policies`).
    referenced: Vec<ClassId>,
    current: TaskId,
    rng: SmallRng,
    resched: bool,
    live_count: usize,
    context_switches: u64,
    trace: Trace,
    started_at: Instant,
    /// Set once `SimStop` is consumed.
    stopped: bool,
    /// Timestamp whose events are currently being consumed.
    step_ts: Option<TimeNs>,
}

impl RunState {
    fn build(
        config: SimConfig,
        rng: SmallRng,
        registry: &[Registered],
    ) -> Result<RunState, SimError> {
        // Active priority order: class_prio entries first, then the rest
        // of the registered order, idle pinned at the end.
        let mut order: Vec<usize> = Vec::with_capacity(registry.len());
        for name in &config.class_prio {
            let idx = registry
                .iter()
                .position(|r| &r.name == name)
                .ok_or_else(|| ConfigError::UnknownPolicy { name: name.clone() })?;
            if !order.contains(&idx) {
                order.push(idx);
            }
        }
        for idx in 0..registry.len() {
            if !order.contains(&idx) {
                order.push(idx);
            }
        }

        let mut policies: Vec<Box<dyn SchedPolicy>> =
            order.iter().map(|&i| (registry[i].factory)()).collect();
        let mut class_names: Vec<String> =
            order.iter().map(|&i| registry[i].name.clone()).collect();
        policies.push(Box::new(crate::policy::idle::Idle::new()));
        class_names.push("idle".to_string());
        let idle_class = ClassId(policies.len() - 1);

        let class_of = |name: &str| -> Result<ClassId, SimError> {
            class_names
                .iter()
                .position(|n| n == name)
                .map(ClassId)
                .ok_or_else(|| {
                    SimError::Config(ConfigError::UnknownPolicy {
                        name: name.to_string(),
                    })
                })
        };

        // Register tasks: idle in slot 0, processes after it.
        let mut tasks = TaskTable::new();
        tasks.push(Task::idle(idle_class));
        let mut rng = rng;
        let mut spawn_times = Vec::with_capacity(config.processes.len());
        for (i, spec) in config.processes.iter().enumerate() {
            let id = TaskId(i + 1);
            let class = class_of(&spec.policy)?;
            let mut task = Task::new(
                id,
                Pid((i + 1) as i32),
                spec.pname.clone(),
                class,
                spec.first,
                spec.steps.clone(),
            );
            task.custom = spec.custom.clone();
            tasks.push(task);
            spawn_times.push(spec.spawn.sample(&mut rng));
        }

        let task_names = tasks
            .iter()
            .map(|t| (t.pid, t.pname.clone()))
            .collect::<Vec<_>>();

        let mut state = RunState {
            clock: 0,
            queue: EventQueue::new(),
            tasks,
            counters: vec![ClassCounters::default(); policies.len()],
            referenced: Vec::new(),
            current: TaskId::IDLE,
            rng,
            resched: false,
            live_count: 0,
            context_switches: 0,
            trace: Trace::new(task_names),
            started_at: Instant::now(),
            stopped: false,
            step_ts: None,
            policies,
            class_names,
            config,
        };

        // SimStart and SimStop go in first so that co-time forks land
        // behind them; a task spawning at sim_len never runs.
        state.insert_event(0, EventKind::SimStart)?;
        state.insert_event(state.config.sim_len, EventKind::SimStop)?;
        state.insert_event(state.config.timer_tick_len, EventKind::Timer)?;
        for (i, &spawn) in spawn_times.iter().enumerate() {
            let task = TaskId(i + 1);
            let handle = state.insert_event(spawn, EventKind::Fork { task })?;
            state.tasks[task].next_event = Some(handle);
        }

        // Members per class, then init every referenced policy in priority
        // order.
        let mut members: HashMap<usize, Vec<TaskId>> = HashMap::new();
        for t in state.tasks.iter() {
            if !t.is_idle() {
                members.entry(t.class.0).or_default().push(t.id);
            }
        }
        for idx in 0..state.policies.len() {
            let Some(member_list) = members.get(&idx).cloned() else {
                continue;
            };
            state.referenced.push(ClassId(idx));
            let params = state.config.class_params.get(&state.class_names[idx]).cloned();
            let RunState {
                policies,
                tasks,
                rng,
                resched,
                clock,
                current,
                config,
                ..
            } = &mut state;
            let mut ctx = PolicyCtx::new(
                *clock,
                tasks,
                rng,
                resched,
                *current,
                config.timer_tick_len,
            );
            policies[idx]
                .init(&mut ctx, params.as_ref(), &member_list)
                .map_err(SimError::Config)?;
        }

        state.tasks[TaskId::IDLE].current = true;
        info!(
            name = %state.config.name,
            sim_len = %FmtN(state.config.sim_len),
            tasks = state.tasks.len() - 1,
            "initialised"
        );
        Ok(state)
    }

    fn idle_class(&self) -> ClassId {
        ClassId(self.policies.len() - 1)
    }

    fn insert_event(&mut self, time: TimeNs, kind: EventKind) -> Result<crate::types::EventHandle, SimError> {
        self.queue.insert(Event {
            time,
            set_on: self.clock,
            kind,
        })
    }

    /// Run a policy protocol call with the context borrowed from disjoint
    /// fields.
    fn policy_call<R>(
        &mut self,
        class: ClassId,
        f: impl FnOnce(&mut dyn SchedPolicy, &mut PolicyCtx<'_>) -> R,
    ) -> R {
        let RunState {
            policies,
            tasks,
            rng,
            resched,
            clock,
            current,
            config,
            ..
        } = self;
        let mut ctx = PolicyCtx::new(
            *clock,
            tasks,
            rng,
            resched,
            *current,
            config.timer_tick_len,
        );
        f(policies[class.0].as_mut(), &mut ctx)
    }

    fn reorder(&mut self, perm: &[usize]) -> Result<(), ConfigError> {
        let real = self.policies.len() - 1;
        check_permutation(perm, real)?;
        // new position -> old index; tasks carry ClassId indices, so remap
        // them through the inverse.
        let mut inverse = vec![0usize; real];
        for (new_pos, &old) in perm.iter().enumerate() {
            inverse[old] = new_pos;
        }
        let mut old_policies: Vec<Option<Box<dyn SchedPolicy>>> =
            self.policies.drain(..).map(Some).collect();
        let mut old_names: Vec<Option<String>> = self.class_names.drain(..).map(Some).collect();
        let mut old_counters: Vec<Option<ClassCounters>> =
            self.counters.drain(..).map(Some).collect();
        for &old in perm {
            self.policies.push(old_policies[old].take().unwrap());
            self.class_names.push(old_names[old].take().unwrap());
            self.counters.push(old_counters[old].take().unwrap());
        }
        // idle stays last
        self.policies.push(old_policies[real].take().unwrap());
        self.class_names.push(old_names[real].take().unwrap());
        self.counters.push(old_counters[real].take().unwrap());

        for task in self.tasks.iter_mut() {
            if task.class.0 < real {
                task.class = ClassId(inverse[task.class.0]);
            }
        }
        for class in &mut self.referenced {
            if class.0 < real {
                *class = ClassId(inverse[class.0]);
            }
        }
        self.referenced.sort();
        Ok(())
    }

    // ----- event loop -------------------------------------------------

    fn run_loop(&mut self, mode: RunMode) -> Result<SimResult, SimError> {
        let mut steps_done = 0usize;
        loop {
            if self.stopped {
                return Ok(self.build_result(true));
            }
            let Some(next_time) = self.queue.peek_next().map(|e| e.time) else {
                return Ok(self.build_result(false));
            };
            match mode {
                RunMode::Until(t) if next_time > t => {
                    self.clock = self.clock.max(t.min(self.config.sim_len));
                    return Ok(self.build_result(false));
                }
                RunMode::Steps(n) => {
                    if self.step_ts != Some(next_time) {
                        if steps_done >= n {
                            return Ok(self.build_result(false));
                        }
                        steps_done += 1;
                        self.step_ts = Some(next_time);
                    }
                }
                _ => {
                    self.step_ts = Some(next_time);
                }
            }

            let event = self.queue.pop_next().expect("peeked event exists");
            self.clock = event.time;
            self.dispatch_event(event)?;
            while self.resched {
                self.resched = false;
                self.dispatch()?;
            }
        }
    }

    fn dispatch_event(&mut self, event: Event) -> Result<(), SimError> {
        debug!(t = event.time, kind = ?event.kind, "event");
        match event.kind {
            EventKind::SimStart => {
                self.trace.record(self.clock, SimEventKind::SimStart);
                self.resched = true;
            }
            EventKind::SimStop => {
                self.finish_run();
            }
            EventKind::Fork { task } => {
                self.fork_task(task)?;
            }
            EventKind::Enqueue { task } => {
                if !self.tasks[task].alive {
                    return Err(SimError::protocol(
                        self.clock,
                        format!("enqueue event for dead task {:?}", self.tasks[task].pname),
                    ));
                }
                self.tasks[task].next_event = None;
                self.trace
                    .record(self.clock, SimEventKind::Enqueue { pid: self.tasks[task].pid.0 });
                self.make_runnable(task)?;
            }
            EventKind::Block { task } => {
                self.block_task(task)?;
            }
            EventKind::Exit { task, cause, nice } => {
                self.exit_task(task, cause, nice)?;
            }
            EventKind::Timer => {
                if self.config.preemption {
                    let class = self.tasks[self.current].class;
                    self.policy_call(class, |p, ctx| p.task_tick(ctx));
                    let next = self.clock + self.config.timer_tick_len;
                    self.insert_event(next, EventKind::Timer)?;
                }
            }
        }
        Ok(())
    }

    // ----- task lifecycle ---------------------------------------------

    fn fork_task(&mut self, task: TaskId) -> Result<(), SimError> {
        let now = self.clock;
        {
            let t = &mut self.tasks[task];
            t.alive = true;
            t.spawned = now;
            t.next_event = None;
        }
        self.live_count += 1;
        self.trace
            .record(now, SimEventKind::Fork { pid: self.tasks[task].pid.0 });
        info!(t = %FmtN(now), task = %self.tasks[task].pname, "FORK");
        // A strict simulated-time exit binds from the moment the final
        // entry is next, whatever state the task is in.
        self.install_strict_exit(task)?;
        self.make_runnable(task)
    }

    /// Shared Fork/Enqueue tail: counters, policy enqueue, preemption
    /// check.
    fn make_runnable(&mut self, task: TaskId) -> Result<(), SimError> {
        let now = self.clock;
        if self.tasks[task].on_rq {
            return Err(SimError::protocol(
                now,
                format!("enqueue of already queued task {:?}", self.tasks[task].pname),
            ));
        }
        let class = self.tasks[task].class;
        self.counters[class.0].flush(now);
        {
            let t = &mut self.tasks[task];
            t.runnable = true;
            t.waiting = true;
            t.enqueued_at = now;
        }
        self.counters[class.0].nr_running += 1;
        self.counters[class.0].nr_waiting += 1;
        self.policy_call(class, |p, ctx| p.enqueue(ctx, task))?;
        self.check_preempt(task);
        Ok(())
    }

    fn block_task(&mut self, task: TaskId) -> Result<(), SimError> {
        let now = self.clock;
        let class = self.tasks[task].class;
        self.counters[class.0].flush(now);
        if self.tasks[task].current {
            self.account_stop(task);
        }
        {
            let t = &mut self.tasks[task];
            t.next_event = None;
            t.remaining_runtime = 0;
            t.runnable = false;
            if t.waiting {
                t.waiting = false;
                self.counters[class.0].nr_waiting -= 1;
            }
        }
        self.counters[class.0].nr_running -= 1;
        if self.tasks[task].on_rq {
            self.policy_call(class, |p, ctx| p.dequeue(ctx, task))?;
        }
        let pause = self.tasks[task].current_behavior.block.sample(&mut self.rng);
        let handle = self.insert_event(now + pause, EventKind::Enqueue { task })?;
        self.tasks[task].next_event = Some(handle);
        self.trace
            .record(now, SimEventKind::Block { pid: self.tasks[task].pid.0 });
        info!(
            t = %FmtN(now),
            task = %self.tasks[task].pname,
            pause = %FmtN(pause),
            "BLOCK"
        );
        self.resched = true;
        Ok(())
    }

    fn exit_task(&mut self, task: TaskId, _cause: ExitCause, _nice: bool) -> Result<(), SimError> {
        let now = self.clock;
        let class = self.tasks[task].class;
        self.counters[class.0].flush(now);
        if self.tasks[task].current {
            self.account_stop(task);
        }
        if self.tasks[task].waiting {
            self.tasks[task].waiting = false;
            self.counters[class.0].nr_waiting -= 1;
        }
        if self.tasks[task].runnable {
            self.tasks[task].runnable = false;
            self.counters[class.0].nr_running -= 1;
        }
        if self.tasks[task].on_rq {
            self.policy_call(class, |p, ctx| p.dequeue(ctx, task))?;
        }
        // Cancel whatever was still scheduled for this task; deleting the
        // handle of the event being processed is a stale no-op.
        if let Some(h) = self.tasks[task].next_event.take() {
            self.queue.delete(h);
        }
        if let Some(h) = self.tasks[task].strict_end_event.take() {
            self.queue.delete(h);
        }
        {
            let t = &mut self.tasks[task];
            t.alive = false;
            t.exited = Some(now);
        }
        self.live_count -= 1;
        self.trace
            .record(now, SimEventKind::Exit { pid: self.tasks[task].pid.0 });
        info!(t = %FmtN(now), task = %self.tasks[task].pname, "EXIT");
        if self.tasks[task].current {
            self.resched = true;
        }
        Ok(())
    }

    /// Close the execution span of the task that ran until `now`.
    /// `updated_at` is deliberately left alone: it is the owning policy's
    /// runtime-accounting marker and only moves at pick time or under the
    /// policy's own updates.
    fn account_stop(&mut self, task: TaskId) {
        let now = self.clock;
        let t = &mut self.tasks[task];
        let span = now - t.picked_at;
        t.exec_time += span;
        if !t.is_idle() {
            t.run_log.push(span);
            t.exec_log.push((now, t.exec_time));
        }
    }

    // ----- dispatch ---------------------------------------------------

    /// The kernel-side pick_next.
    fn dispatch(&mut self) -> Result<(), SimError> {
        let now = self.clock;
        let prev = self.current;

        // Preemption handling for a still-runnable previous task. If its
        // own event is due right now, it is consumed inline and that
        // handler re-requests the dispatch.
        if self.tasks[prev].runnable && !self.tasks[prev].is_idle() {
            if self.handle_preempt(prev)? {
                return Ok(());
            }
        }

        // Ask the policies in priority order. Every class's latency is
        // flushed on every decision, asked or not; the idle policy is
        // skipped while the previous task can still run.
        let idle_class = self.idle_class();
        let mut winner: Option<TaskId> = None;
        for idx in 0..self.policies.len() {
            self.counters[idx].flush(now);
            if winner.is_some() {
                continue;
            }
            if idx == idle_class.0 && self.tasks[prev].runnable {
                continue;
            }
            if let Some(t) = self.policy_call(ClassId(idx), |p, ctx| p.pick_next(ctx, prev)) {
                self.check_picked(ClassId(idx), t)?;
                debug_assert!(
                    !self.policies[idx].queued().contains(&t),
                    "picked task still stored in its runqueue"
                );
                winner = Some(t);
            }
        }
        // Work conservation: nothing queued anywhere, but the previous
        // task can continue.
        let next = winner.unwrap_or(prev);

        // put_prev on the previous task's policy, exactly once, iff a
        // policy returned a task other than the previous one.
        if let Some(w) = winner {
            if w != prev {
                let prev_class = self.tasks[prev].class;
                self.policy_call(prev_class, |p, ctx| p.put_prev(ctx, prev))?;
            }
        }

        self.finish_switch(prev, next)
    }

    fn check_picked(&self, class: ClassId, t: TaskId) -> Result<(), SimError> {
        let task = &self.tasks[t];
        if !task.alive || !task.runnable {
            return Err(SimError::protocol(
                self.clock,
                format!(
                    "policy {:?} returned non-runnable task {:?}",
                    self.class_names[class.0], task.pname
                ),
            ));
        }
        if task.on_rq {
            return Err(SimError::protocol(
                self.clock,
                format!(
                    "policy {:?} returned task {:?} still on a runqueue",
                    self.class_names[class.0], task.pname
                ),
            ));
        }
        if task.class != class && !task.is_idle() {
            return Err(SimError::protocol(
                self.clock,
                format!(
                    "policy {:?} returned foreign task {:?}",
                    self.class_names[class.0], task.pname
                ),
            ));
        }
        Ok(())
    }

    /// Deschedule a still-runnable `prev`. Returns true when its own event
    /// was due now and has been consumed inline.
    fn handle_preempt(&mut self, prev: TaskId) -> Result<bool, SimError> {
        let now = self.clock;
        let elapsed = now - self.tasks[prev].picked_at;
        let remaining = self.tasks[prev].remaining_runtime;
        if remaining == 0 {
            return Err(SimError::invariant(
                now,
                format!(
                    "task {:?} on a preemption path with no remaining runtime",
                    self.tasks[prev].pname
                ),
            ));
        }
        let new_remaining = remaining.saturating_sub(elapsed);
        self.tasks[prev].remaining_runtime = new_remaining;

        let due_now = self.tasks[prev]
            .next_event
            .and_then(|h| self.queue.get(h))
            .map(|e| e.time == now)
            .unwrap_or(false);
        if new_remaining == 0 || due_now {
            // The burst ends at this very instant; consume the task's own
            // event (block or exit) instead of preempting.
            let handle = self.tasks[prev].next_event.ok_or_else(|| {
                SimError::invariant(
                    now,
                    format!("running task {:?} has no pending event", self.tasks[prev].pname),
                )
            })?;
            let event = self.queue.delete(handle).ok_or_else(|| {
                SimError::invariant(
                    now,
                    format!("stale pending event on task {:?}", self.tasks[prev].pname),
                )
            })?;
            self.tasks[prev].next_event = None;
            self.dispatch_event(Event { time: now, ..event })?;
            return Ok(true);
        }

        // A non-nice exec_count exit does not survive preemption: the
        // block it replaced turns into an exit right here.
        if let Some(h) = self.tasks[prev].next_event {
            if let Some(&Event {
                kind:
                    EventKind::Exit {
                        task,
                        cause: ExitCause::ExecCount,
                        nice: false,
                    },
                ..
            }) = self.queue.get(h)
            {
                self.queue.delete(h);
                self.tasks[prev].next_event = None;
                self.dispatch_event(Event {
                    time: now,
                    set_on: now,
                    kind: EventKind::Exit {
                        task,
                        cause: ExitCause::ExecCount,
                        nice: false,
                    },
                })?;
                return Ok(true);
            }
        }

        // Plain preemption: cancel the scheduled block (a strict exit
        // stays in the queue), account the span, and rejoin the waiters.
        if let Some(h) = self.tasks[prev].next_event.take() {
            if Some(h) != self.tasks[prev].strict_end_event {
                self.queue.delete(h);
            }
        }
        self.account_stop(prev);
        self.trace
            .record(now, SimEventKind::Preempt { pid: self.tasks[prev].pid.0 });
        debug!(t = now, task = %self.tasks[prev].pname, left = new_remaining, "preempt");
        let class = self.tasks[prev].class;
        self.counters[class.0].flush(now);
        self.tasks[prev].waiting = true;
        self.tasks[prev].enqueued_at = now;
        self.counters[class.0].nr_waiting += 1;
        Ok(false)
    }

    /// Steps 5 and 6 of the dispatch: switch bookkeeping, behaviour FSM,
    /// next-event scheduling.
    fn finish_switch(&mut self, prev: TaskId, next: TaskId) -> Result<(), SimError> {
        let now = self.clock;

        // Idle execution is accounted at dispatch time; its picked_at
        // resets below, so this also covers an idle re-pick.
        if self.tasks[prev].is_idle() {
            self.account_stop(prev);
        }
        if prev != next {
            self.context_switches += 1;
            self.tasks[prev].current = false;
            self.tasks[next].current = true;
            self.current = next;
        }

        if self.tasks[next].waiting {
            let class = self.tasks[next].class;
            let waited = now - self.tasks[next].enqueued_at;
            let t = &mut self.tasks[next];
            t.waiting = false;
            t.latency_log.push(waited);
            t.wait_time += waited;
            self.counters[class.0].nr_waiting -= 1;
        }

        self.trace
            .record(now, SimEventKind::Pick { pid: self.tasks[next].pid.0 });
        debug!(t = now, task = %self.tasks[next].pname, "pick");

        if self.tasks[next].is_idle() {
            let t = &mut self.tasks[next];
            t.picked_at = now;
            t.updated_at = now;
            return Ok(());
        }

        // Behaviour FSM: at most one update, then a possible final.
        self.tasks[next].apply_behavior_update(now);
        self.install_strict_exit(next)?;

        if self.tasks[next].remaining_runtime == 0 {
            let run = self.tasks[next].current_behavior.run;
            self.tasks[next].remaining_runtime = run.sample(&mut self.rng);
        }
        self.schedule_burst_end(next)?;

        let t = &mut self.tasks[next];
        t.picked_at = now;
        t.updated_at = now;
        t.sched.prev_sum_exec = t.exec_time;
        t.exec_count += 1;
        Ok(())
    }

    /// Place the strict `sim_exec` exit if the pending final calls for
    /// one. Fires unconditionally at `max(now, threshold)` whatever the
    /// task is doing then.
    fn install_strict_exit(&mut self, task: TaskId) -> Result<(), SimError> {
        let Some((SwitchWhen::SimExec(threshold), false)) = self.tasks[task].pending_final()
        else {
            return Ok(());
        };
        if self.tasks[task].strict_end_event.is_some() {
            return Ok(());
        }
        let time = threshold.max(self.clock);
        let handle = self.insert_event(
            time,
            EventKind::Exit {
                task,
                cause: ExitCause::SimExec,
                nice: false,
            },
        )?;
        self.tasks[task].strict_end_event = Some(handle);
        Ok(())
    }

    /// Schedule the event that ends the burst just granted: a block, or an
    /// exit when the pending final entry fires.
    fn schedule_burst_end(&mut self, task: TaskId) -> Result<(), SimError> {
        let now = self.clock;
        let remaining = self.tasks[task].remaining_runtime;
        let burst_end = now + remaining;
        let exec_time = self.tasks[task].exec_time;
        let exec_count = self.tasks[task].exec_count;

        let exit = |cause, nice| EventKind::Exit { task, cause, nice };

        let plan: (TimeNs, EventKind) = match self.tasks[task].pending_final() {
            // Strict simulated-time exit: the handle is already queued;
            // alias it when this burst runs into it.
            Some((SwitchWhen::SimExec(_), false)) => {
                let strict = self.tasks[task]
                    .strict_end_event
                    .expect("strict exit installed at pick");
                let strict_time = self
                    .queue
                    .get(strict)
                    .map(|e| e.time)
                    .ok_or_else(|| {
                        SimError::invariant(now, "strict end event vanished from the queue")
                    })?;
                if burst_end >= strict_time {
                    self.tasks[task].next_event = Some(strict);
                    return Ok(());
                }
                (burst_end, EventKind::Block { task })
            }
            // Nice simulated-time exit: only once the burst reaches the
            // threshold; otherwise no exit event yet.
            Some((SwitchWhen::SimExec(threshold), true)) => {
                if burst_end >= threshold {
                    (burst_end, exit(ExitCause::SimExec, true))
                } else {
                    (burst_end, EventKind::Block { task })
                }
            }
            // Strict CPU-time exit: fires mid-burst once the threshold's
            // worth of CPU time is consumed, or immediately past it.
            Some((SwitchWhen::ProcExec(threshold), false)) => {
                let needed = threshold.saturating_sub(exec_time);
                if needed == 0 {
                    (now + 1, exit(ExitCause::ProcExec, false))
                } else if needed <= remaining {
                    (now + needed, exit(ExitCause::ProcExec, false))
                } else {
                    (burst_end, EventKind::Block { task })
                }
            }
            // Nice CPU-time exit: the burst that satisfied the condition
            // finishes first.
            Some((SwitchWhen::ProcExec(threshold), true)) => {
                if threshold <= exec_time {
                    (burst_end, exit(ExitCause::ProcExec, true))
                } else {
                    (burst_end, EventKind::Block { task })
                }
            }
            // Dispatch-count exits ride the end of the burst; the strict
            // variant additionally fires on preemption.
            Some((SwitchWhen::ExecCount(n), nice)) => {
                if exec_count >= n {
                    (burst_end, exit(ExitCause::ExecCount, nice))
                } else {
                    (burst_end, EventKind::Block { task })
                }
            }
            None => (burst_end, EventKind::Block { task }),
        };

        let handle = self.insert_event(plan.0, plan.1)?;
        self.tasks[task].next_event = Some(handle);
        Ok(())
    }

    /// Kernel-side preemption check for a task that just became runnable.
    fn check_preempt(&mut self, new_task: TaskId) {
        let current = self.current;
        let new_class = self.tasks[new_task].class;
        let cur_class = self.tasks[current].class;
        if new_class == cur_class {
            self.policy_call(new_class, |p, ctx| p.check_preempt(ctx, new_task));
        } else if new_class.0 < cur_class.0 {
            // Priority order is the class index order; idle sits at the
            // very end, so anything preempts it.
            self.resched = true;
        }
    }

    // ----- finalisation -----------------------------------------------

    fn finish_run(&mut self) {
        let now = self.clock;
        self.account_stop(self.current);
        for idx in 0..self.counters.len() {
            self.counters[idx].flush(now);
        }
        self.trace.record(now, SimEventKind::SimStop);
        self.stopped = true;
        info!(
            t = %FmtN(now),
            context_switches = self.context_switches,
            "sim stop"
        );
    }

    fn build_result(&self, finished: bool) -> SimResult {
        let run_time = self.clock;
        let process_list: Vec<ProcessSnapshot> = self
            .tasks
            .iter()
            .filter(|t| !t.is_idle())
            .map(|t| ProcessSnapshot {
                pid: t.pid.0,
                pname: t.pname.clone(),
                policy: self.class_names[t.class.0].clone(),
                alive: t.alive,
                runnable: t.runnable,
                spawned: t.spawned,
                exited: t.exited,
                exec_count: t.exec_count,
                exec_time: t.exec_time,
                wait_time: t.wait_time,
                remaining_runtime: t.remaining_runtime,
                run_log: t.run_log.clone(),
                latency_log: t.latency_log.clone(),
                exec_log: t.exec_log.clone(),
                custom: t.custom.clone(),
            })
            .collect();

        let mut result = SimResult {
            name: self.config.name.clone(),
            duration_ms: self.started_at.elapsed().as_secs_f64() * 1e3,
            finished,
            run_time,
            length: self.config.sim_len,
            context_switches: self.context_switches,
            sim_events: self.trace.events().to_vec(),
            process_list,
            idle_time: self.tasks[TaskId::IDLE].exec_time,
            average_load: 0.0,
            average_latency: LatencyReport::default(),
            average_turnaround: TurnaroundReport::default(),
            active_classes: self
                .referenced
                .iter()
                .map(|c| self.class_names[c.0].clone())
                .collect(),
            class_stats: Vec::new(),
            process_stats: Vec::new(),
        };
        if !finished {
            // Partial runs carry the raw logs but no aggregates.
            return result;
        }

        let busy: TimeNs = self
            .tasks
            .iter()
            .filter(|t| !t.is_idle())
            .map(|t| t.exec_time)
            .sum();
        result.average_load = if run_time == 0 {
            0.0
        } else {
            busy as f64 / run_time as f64
        };

        let mut general = DistributionStats::new();
        let mut by_class = Vec::new();
        for &class in &self.referenced {
            let counters = &self.counters[class.0];
            for &(_, sample) in &counters.latency_log {
                general.add(sample as f64);
            }
            by_class.push(ClassLatency {
                class: self.class_names[class.0].clone(),
                latency: counters.latency_stats(),
            });
        }
        result.average_latency = LatencyReport {
            general: general.avg_dev(),
            by_class,
        };

        let mut turnaround = DistributionStats::new();
        for t in self.tasks.iter().filter(|t| !t.is_idle()) {
            if let Some(exited) = t.exited {
                turnaround.add((exited - t.spawned) as f64);
            }
        }
        let AvgDev { avg, dev } = turnaround.avg_dev();
        result.average_turnaround = TurnaroundReport {
            avg,
            dev,
            exited: turnaround.count,
            running: self.live_count,
        };

        result.class_stats = self
            .referenced
            .iter()
            .map(|&class| self.policies[class.0].class_stats(&self.counters[class.0]))
            .collect();
        result.process_stats = result
            .process_list
            .iter()
            .map(ProcessStats::from_snapshot)
            .collect();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_permutation() {
        assert!(check_permutation(&[2, 0, 1], 3).is_ok());
        assert!(check_permutation(&[0, 0, 1], 3).is_err());
        assert!(check_permutation(&[0, 1], 3).is_err());
        assert!(check_permutation(&[0, 1, 3], 3).is_err());
    }

    #[test]
    fn test_register_policy_rejects_duplicates() {
        let mut engine = Engine::new();
        let err = engine.register_policy(
            "fcfs",
            Box::new(|| Box::new(crate::policy::fcfs::Fcfs::new())),
        );
        assert!(err.is_err());

        engine
            .register_policy(
                "fcfs2",
                Box::new(|| Box::new(crate::policy::fcfs::Fcfs::new())),
            )
            .unwrap();
        // New policies go to the tail of the registered order.
        assert_eq!(engine.policy_names().last().map(String::as_str), Some("fcfs2"));
    }

    #[test]
    fn test_reorder_registered() {
        let mut engine = Engine::new();
        let names = engine.policy_names();
        let n = names.len();
        // Rotate the first two entries.
        let mut perm: Vec<usize> = (0..n).collect();
        perm.swap(0, 1);
        engine.reorder_registered(&perm).unwrap();
        let reordered = engine.policy_names();
        assert_eq!(reordered[0], names[1]);
        assert_eq!(reordered[1], names[0]);
        assert_eq!(&reordered[2..], &names[2..]);
    }

    #[test]
    fn test_run_without_init() {
        let mut engine = Engine::new();
        assert!(matches!(engine.run(), Err(SimError::NoRun)));
        assert!(matches!(engine.step(1), Err(SimError::NoRun)));
        assert!(engine.partial_result().is_none());
    }
}
