//! Configuration schema, validation, and a builder for embedders and tests.
//!
//! A configuration arrives as a structured document (typically JSON),
//! deserialises into the raw schema below, and validates into [`SimConfig`].
//! Validation is all-or-nothing: any parse failure is fatal for the whole
//! load and the engine refuses to start.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::task::{BehaviorSpec, BehaviorStep, SwitchWhen, RESERVED_TASK_FIELDS};
use crate::timespec::{TimeSpec, TimeValue};
use crate::types::TimeNs;

/// Default timer tick: 1 ms.
pub const DEFAULT_TIMER_TICK: TimeNs = 1_000_000;

/// Default PRNG seed used when the configuration specifies none.
pub const DEFAULT_SEED: u64 = 42;

/// Raw top-level document, prior to validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    name: String,
    sim_len: TimeSpec,
    timer_tick_len: Option<TimeSpec>,
    policy: Option<String>,
    class_prio: Option<Vec<String>>,
    class_params: Option<HashMap<String, Value>>,
    #[serde(default)]
    processes: Vec<RawProcess>,
    seed: Option<u64>,
    reseed_per_run: Option<bool>,
    preemption: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProcess {
    pname: Option<String>,
    spawn: TimeSpec,
    policy: Option<String>,
    custom: Option<Map<String, Value>>,
    #[serde(default)]
    behavior: Vec<RawBehaviorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBehaviorEntry {
    priority: Option<i64>,
    run: Option<TimeSpec>,
    block: Option<TimeSpec>,
    #[serde(rename = "final")]
    final_: Option<bool>,
    end_nicely: Option<bool>,
    sim_exec: Option<TimeSpec>,
    proc_exec: Option<TimeSpec>,
    exec_count: Option<u64>,
}

/// A validated task specification.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub pname: String,
    pub spawn: TimeValue,
    /// Resolved policy name (the task's own, or the config default).
    pub policy: String,
    pub custom: Map<String, Value>,
    pub first: BehaviorSpec,
    pub steps: Vec<BehaviorStep>,
}

/// A validated configuration, ready for `Engine::init`.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub name: String,
    pub sim_len: TimeNs,
    pub timer_tick_len: TimeNs,
    /// Policies promoted to the top of the priority order, in order.
    pub class_prio: Vec<String>,
    pub class_params: HashMap<String, Value>,
    pub processes: Vec<ProcessSpec>,
    pub seed: u64,
    /// Multi-run RNG knob: reseed each run (`seed + run_index`) or continue
    /// the stream across runs.
    pub reseed_per_run: bool,
    /// Whether timer ticks drive `task_tick` (preemptive scheduling).
    pub preemption: bool,
}

impl SimConfig {
    /// Parse and validate a JSON document. `known_policies` is the set of
    /// registered policy names; every reference is checked against it.
    pub fn from_json(text: &str, known_policies: &[String]) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;
        Self::validate(raw, known_policies)
    }

    /// Validate an already-parsed document.
    pub fn from_value(value: Value, known_policies: &[String]) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_value(value)?;
        Self::validate(raw, known_policies)
    }

    fn validate(raw: RawConfig, known_policies: &[String]) -> Result<Self, ConfigError> {
        let known = |name: &str| known_policies.iter().any(|k| k == name);

        let sim_len = match raw.sim_len.resolve(1)? {
            TimeValue::Fixed(v) => v,
            TimeValue::Interval(..) => {
                return Err(ConfigError::Invalid("sim_len must be a scalar time".into()))
            }
        };

        let timer_tick_len = match raw.timer_tick_len {
            None => DEFAULT_TIMER_TICK,
            Some(spec) => match spec.resolve(1)? {
                TimeValue::Fixed(v) if v > 1 => v,
                TimeValue::Fixed(v) => {
                    return Err(ConfigError::Invalid(format!(
                        "timer_tick_len must exceed 1ns, got {v}"
                    )))
                }
                TimeValue::Interval(..) => {
                    return Err(ConfigError::Invalid(
                        "timer_tick_len must be a scalar time".into(),
                    ))
                }
            },
        };

        if let Some(default) = &raw.policy {
            if !known(default) {
                return Err(ConfigError::UnknownPolicy {
                    name: default.clone(),
                });
            }
        }

        let class_prio = raw.class_prio.unwrap_or_default();
        for name in &class_prio {
            if !known(name) {
                return Err(ConfigError::UnknownPolicy { name: name.clone() });
            }
        }

        let class_params = raw.class_params.unwrap_or_default();
        for name in class_params.keys() {
            if !known(name) {
                return Err(ConfigError::UnknownPolicy { name: name.clone() });
            }
        }

        let mut processes = Vec::with_capacity(raw.processes.len());
        for (idx, proc) in raw.processes.into_iter().enumerate() {
            let pname = proc
                .pname
                .clone()
                .unwrap_or_else(|| format!("proc{}", idx + 1));

            let policy = match proc.policy.or_else(|| raw.policy.clone()) {
                Some(p) => p,
                None => {
                    return Err(ConfigError::InvalidProcess {
                        pname,
                        reason: "no policy given and the configuration has no default".into(),
                    })
                }
            };
            if !known(&policy) {
                return Err(ConfigError::UnknownPolicy { name: policy });
            }

            let custom = proc.custom.unwrap_or_default();
            for key in custom.keys() {
                if RESERVED_TASK_FIELDS.contains(&key.as_str()) {
                    return Err(ConfigError::ReservedCustomKey {
                        pname,
                        key: key.clone(),
                    });
                }
            }

            let spawn = proc.spawn.resolve(1)?;

            let (first, steps) = validate_behavior(&pname, &proc.behavior)?;

            processes.push(ProcessSpec {
                pname,
                spawn,
                policy,
                custom,
                first,
                steps,
            });
        }

        Ok(SimConfig {
            name: raw.name,
            sim_len,
            timer_tick_len,
            class_prio,
            class_params,
            processes,
            seed: raw.seed.unwrap_or(DEFAULT_SEED),
            reseed_per_run: raw.reseed_per_run.unwrap_or(true),
            preemption: raw.preemption.unwrap_or(true),
        })
    }

    /// Start a typed builder, mainly for tests and embedders.
    pub fn builder(name: &str) -> ConfigBuilder {
        ConfigBuilder::new(name)
    }
}

/// Check one behaviour list: entry 0 complete, subsequent entries either an
/// update with exactly one switch condition or a final.
fn validate_behavior(
    pname: &str,
    entries: &[RawBehaviorEntry],
) -> Result<(BehaviorSpec, Vec<BehaviorStep>), ConfigError> {
    let invalid = |index: usize, reason: &str| ConfigError::InvalidBehavior {
        pname: pname.to_string(),
        index,
        reason: reason.to_string(),
    };

    let Some(head) = entries.first() else {
        return Err(invalid(0, "behavior list is empty"));
    };
    if head.final_.is_some()
        || head.end_nicely.is_some()
        || head.sim_exec.is_some()
        || head.proc_exec.is_some()
        || head.exec_count.is_some()
    {
        return Err(invalid(0, "entry 0 must not carry switch or final fields"));
    }
    let (Some(priority), Some(run), Some(block)) = (head.priority, &head.run, &head.block) else {
        return Err(invalid(0, "entry 0 needs priority, run and block"));
    };
    let first = BehaviorSpec {
        priority,
        run: run.resolve(1)?,
        block: block.resolve(1)?,
    };

    let mut steps = Vec::with_capacity(entries.len() - 1);
    for (i, entry) in entries.iter().enumerate().skip(1) {
        let when = switch_condition(pname, i, entry)?;
        if entry.final_.unwrap_or(false) {
            if entry.priority.is_some() || entry.run.is_some() || entry.block.is_some() {
                return Err(invalid(i, "final entry must not carry behaviour fields"));
            }
            steps.push(BehaviorStep::Final {
                when,
                end_nicely: entry.end_nicely.unwrap_or(true),
            });
        } else {
            if entry.end_nicely.is_some() {
                return Err(invalid(i, "end_nicely is only valid on final entries"));
            }
            if entry.priority.is_none() && entry.run.is_none() && entry.block.is_none() {
                return Err(invalid(
                    i,
                    "update entry needs at least one of priority, run, block",
                ));
            }
            steps.push(BehaviorStep::Update {
                when,
                priority: entry.priority,
                run: entry.run.as_ref().map(|r| r.resolve(1)).transpose()?,
                block: entry.block.as_ref().map(|b| b.resolve(1)).transpose()?,
            });
        }
    }
    Ok((first, steps))
}

/// Extract the exactly-one switch condition of a non-first entry.
fn switch_condition(
    pname: &str,
    index: usize,
    entry: &RawBehaviorEntry,
) -> Result<SwitchWhen, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBehavior {
        pname: pname.to_string(),
        index,
        reason: reason.to_string(),
    };
    let scalar = |spec: &TimeSpec| -> Result<TimeNs, ConfigError> {
        match spec.resolve(1)? {
            TimeValue::Fixed(v) => Ok(v),
            TimeValue::Interval(..) => Err(invalid("switch conditions must be scalar times")),
        }
    };

    let mut conditions = 0;
    conditions += entry.sim_exec.is_some() as usize;
    conditions += entry.proc_exec.is_some() as usize;
    conditions += entry.exec_count.is_some() as usize;
    if conditions != 1 {
        return Err(invalid(
            "entry needs exactly one of sim_exec, proc_exec, exec_count",
        ));
    }

    if let Some(spec) = &entry.sim_exec {
        return Ok(SwitchWhen::SimExec(scalar(spec)?));
    }
    if let Some(spec) = &entry.proc_exec {
        return Ok(SwitchWhen::ProcExec(scalar(spec)?));
    }
    Ok(SwitchWhen::ExecCount(entry.exec_count.unwrap()))
}

/// Typed builder producing a validated [`SimConfig`] without a JSON round
/// trip. Behaviour lists are supplied already typed.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    name: String,
    sim_len: TimeNs,
    timer_tick_len: TimeNs,
    default_policy: Option<String>,
    class_prio: Vec<String>,
    class_params: HashMap<String, Value>,
    processes: Vec<ProcessSpec>,
    seed: u64,
    reseed_per_run: bool,
    preemption: bool,
}

impl ConfigBuilder {
    pub fn new(name: &str) -> Self {
        ConfigBuilder {
            name: name.to_string(),
            sim_len: 100_000_000,
            timer_tick_len: DEFAULT_TIMER_TICK,
            default_policy: None,
            class_prio: Vec::new(),
            class_params: HashMap::new(),
            processes: Vec::new(),
            seed: DEFAULT_SEED,
            reseed_per_run: true,
            preemption: true,
        }
    }

    pub fn sim_len(mut self, ns: TimeNs) -> Self {
        self.sim_len = ns;
        self
    }

    pub fn timer_tick(mut self, ns: TimeNs) -> Self {
        self.timer_tick_len = ns;
        self
    }

    pub fn default_policy(mut self, name: &str) -> Self {
        self.default_policy = Some(name.to_string());
        self
    }

    pub fn class_prio(mut self, order: &[&str]) -> Self {
        self.class_prio = order.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn class_param(mut self, class: &str, params: Value) -> Self {
        self.class_params.insert(class.to_string(), params);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn reseed_per_run(mut self, yes: bool) -> Self {
        self.reseed_per_run = yes;
        self
    }

    pub fn preemption(mut self, yes: bool) -> Self {
        self.preemption = yes;
        self
    }

    /// Add a task with a fixed spawn and a single behaviour entry.
    pub fn process(mut self, pname: &str, spawn: TimeNs, first: BehaviorSpec) -> Self {
        let policy = self.default_policy.clone().unwrap_or_default();
        self.processes.push(ProcessSpec {
            pname: pname.to_string(),
            spawn: TimeValue::Fixed(spawn),
            policy,
            custom: Map::new(),
            first,
            steps: Vec::new(),
        });
        self
    }

    /// Add a task with an explicit policy and behaviour steps.
    pub fn process_full(
        mut self,
        pname: &str,
        spawn: TimeValue,
        policy: &str,
        first: BehaviorSpec,
        steps: Vec<BehaviorStep>,
    ) -> Self {
        self.processes.push(ProcessSpec {
            pname: pname.to_string(),
            spawn,
            policy: policy.to_string(),
            custom: Map::new(),
            first,
            steps,
        });
        self
    }

    pub fn build(self) -> SimConfig {
        SimConfig {
            name: self.name,
            sim_len: self.sim_len,
            timer_tick_len: self.timer_tick_len,
            class_prio: self.class_prio,
            class_params: self.class_params,
            processes: self.processes,
            seed: self.seed,
            reseed_per_run: self.reseed_per_run,
            preemption: self.preemption,
        }
    }
}
