//! schedsim - Deterministic event-driven simulator for process scheduling
//! policies.
//!
//! This crate simulates how a single-CPU system dispatches synthetic tasks
//! (parametric run/block behaviours) under a stack of scheduling policies
//! modelled on the Linux scheduler lineage: FCFS, Round-Robin, SJF/SRTF,
//! the original scheduler, O(n), O(1), and a CFS-like fair policy.
//!
//! # Architecture
//!
//! - **Engine**: event-driven kernel owning the clock, the event queue and
//!   the priority-ordered policy stack
//! - **Tasks**: scripted behaviours (run/block bursts, staged updates,
//!   parametric exits)
//! - **Policies**: the six-method dispatch protocol
//!   (`enqueue`/`dequeue`/`pick_next`/`put_prev`/`check_preempt`/`task_tick`)
//! - **Statistics**: per-class latency sampling, per-task logs, multi-run
//!   reduction
//!
//! # Usage
//!
//! ```rust
//! use schedsim::{BehaviorSpec, Engine, SimConfig, TimeValue};
//!
//! let config = SimConfig::builder("demo")
//!     .sim_len(1_000_000)
//!     .default_policy("fcfs")
//!     .process(
//!         "worker",
//!         0,
//!         BehaviorSpec {
//!             priority: 0,
//!             run: TimeValue::Fixed(10_000),
//!             block: TimeValue::Fixed(5_000),
//!         },
//!     )
//!     .build();
//!
//! let mut engine = Engine::new();
//! engine.init(config).unwrap();
//! let result = engine.run().unwrap();
//! assert!(result.finished);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fmt;
pub mod policy;
pub mod runqueue;
pub mod stats;
pub mod task;
pub mod timespec;
pub mod trace;
pub mod types;

// Re-export the main public types for convenience.
pub use config::{ConfigBuilder, ProcessSpec, SimConfig};
pub use engine::Engine;
pub use error::{ConfigError, SimError};
pub use event::{Event, EventKind, EventQueue, ExitCause};
pub use fmt::{FmtN, FmtTs};
pub use policy::{PolicyCtx, SchedPolicy};
pub use runqueue::OrderedRunqueue;
pub use stats::{
    AvgDev, ClassStatsReport, DistributionStats, MultiRunResult, ProcessSnapshot, ProcessStats,
    SimResult,
};
pub use task::{nice_to_weight, BehaviorSpec, BehaviorStep, SwitchWhen, Task};
pub use timespec::{parse_duration, TimeSpec, TimeValue};
pub use trace::{SimEvent, SimEventKind, Trace};
pub use types::{ClassId, EventHandle, Pid, TaskId, TimeNs, Vtime};
