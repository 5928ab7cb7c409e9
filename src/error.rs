//! Error taxonomy for configuration loading and engine execution.
//!
//! Two families, by shape:
//!
//! - [`ConfigError`]: the load rejects the document; the engine never
//!   starts. Malformed schema, unknown policy names, invalid behaviour
//!   entries, reserved `custom` keys, out-of-range priorities.
//! - [`SimError`]: a running simulation aborts. Protocol violations and
//!   invariant violations indicate an engine or policy bug; there is no
//!   recovery at the engine level. The embedder keeps access to the partial
//!   process list and event log collected before the abort.

use thiserror::Error;

use crate::types::TimeNs;

/// Fatal configuration problems detected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A time field failed to parse (bad unit, negative, malformed interval).
    #[error("invalid time value {value:?}: {reason}")]
    InvalidTime { value: String, reason: String },

    /// A policy name is not in the registered set.
    #[error("unknown policy {name:?}")]
    UnknownPolicy { name: String },

    /// A top-level or process-level field is missing or out of range.
    #[error("process {pname:?}: {reason}")]
    InvalidProcess { pname: String, reason: String },

    /// A behaviour entry violates the schema (entry 0 incomplete, update
    /// without a switch condition, final with several conditions, ...).
    #[error("process {pname:?}, behavior entry {index}: {reason}")]
    InvalidBehavior {
        pname: String,
        index: usize,
        reason: String,
    },

    /// A `custom` key collides with a kernel-owned task field.
    #[error("process {pname:?}: custom field {key:?} collides with a reserved task field")]
    ReservedCustomKey { pname: String, key: String },

    /// A per-class parameter failed validation.
    #[error("class {class:?}, parameter {param:?}: {reason}")]
    InvalidClassParam {
        class: String,
        param: String,
        reason: String,
    },

    /// A task priority is outside the range its class accepts.
    #[error("class {class:?}: priority {value} out of range {min}..={max}")]
    PriorityOutOfRange {
        class: String,
        value: i64,
        min: i64,
        max: i64,
    },

    /// Top-level schema problem not tied to one process.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The document is not valid JSON for the schema at all.
    #[error("malformed configuration document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Fatal conditions during a run. All of these abort the simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// A policy or the kernel broke the dispatch protocol: a picked task
    /// that is not runnable, enqueue of an already-queued task, dequeue of
    /// a task that is not queued, an unknown event variant in the queue.
    #[error("protocol violation at t={now}: {detail}")]
    Protocol { now: TimeNs, detail: String },

    /// A cross-structure invariant failed: a task absent where its
    /// runqueue key says it should be, a zero remaining runtime on a
    /// preemption path.
    #[error("invariant violation at t={now}: {detail}")]
    Invariant { now: TimeNs, detail: String },

    /// An event was inserted behind the clock.
    #[error("event inserted in the past: t={time} < now={now}")]
    PastEvent { now: TimeNs, time: TimeNs },

    /// Configuration was rejected before the run started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An engine call that needs an initialised run (`run`, `step`,
    /// `run_until`, `break`) found none.
    #[error("no run in progress; call init() first")]
    NoRun,
}

impl SimError {
    pub(crate) fn protocol(now: TimeNs, detail: impl Into<String>) -> Self {
        SimError::Protocol {
            now,
            detail: detail.into(),
        }
    }

    pub(crate) fn invariant(now: TimeNs, detail: impl Into<String>) -> Self {
        SimError::Invariant {
            now,
            detail: detail.into(),
        }
    }
}
