//! Simulation event log.
//!
//! Every lifecycle transition and scheduling decision is recorded as a
//! [`SimEvent`] with its simulated timestamp. The log is part of the result
//! object and is what the engine preserves on an abort.

use serde::Serialize;
use tracing::info;

use crate::fmt::FmtTs;
use crate::types::{Pid, TimeNs};

/// The kind of logged event. `Pick` and `Preempt` exist only here; they are
/// never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEventKind {
    SimStart,
    SimStop,
    Fork { pid: i32 },
    Enqueue { pid: i32 },
    Block { pid: i32 },
    Exit { pid: i32 },
    /// A running task was descheduled with runtime left in its burst.
    Preempt { pid: i32 },
    /// A task was chosen to run.
    Pick { pid: i32 },
}

/// A single logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SimEvent {
    pub time: TimeNs,
    #[serde(flatten)]
    pub kind: SimEventKind,
}

/// The chronological event log of one run.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<SimEvent>,
    task_names: Vec<(Pid, String)>,
}

impl Trace {
    pub fn new(task_names: Vec<(Pid, String)>) -> Self {
        Trace {
            events: Vec::new(),
            task_names,
        }
    }

    pub fn record(&mut self, time: TimeNs, kind: SimEventKind) {
        self.events.push(SimEvent { time, kind });
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Resolve a PID to a task name, or `"???"` if unknown.
    pub fn task_name(&self, pid: i32) -> &str {
        self.task_names
            .iter()
            .find(|(p, _)| p.0 == pid)
            .map(|(_, n)| n.as_str())
            .unwrap_or("???")
    }

    /// Timestamps of every `Pick` of the given pid, in order.
    pub fn picks_of(&self, pid: i32) -> Vec<TimeNs> {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, SimEventKind::Pick { pid: p } if p == pid))
            .map(|e| e.time)
            .collect()
    }

    /// PIDs in order of their first `Pick`.
    pub fn first_pick_order(&self) -> Vec<i32> {
        let mut seen = Vec::new();
        for e in &self.events {
            if let SimEventKind::Pick { pid } = e.kind {
                if pid != 0 && !seen.contains(&pid) {
                    seen.push(pid);
                }
            }
        }
        seen
    }

    /// Log the whole trace through `tracing` at info level.
    pub fn dump(&self) {
        for e in &self.events {
            let line = match e.kind {
                SimEventKind::SimStart => "sim_start".to_string(),
                SimEventKind::SimStop => "sim_stop".to_string(),
                SimEventKind::Fork { pid } => format!("fork    {} ({})", pid, self.task_name(pid)),
                SimEventKind::Enqueue { pid } => {
                    format!("enqueue {} ({})", pid, self.task_name(pid))
                }
                SimEventKind::Block { pid } => format!("block   {} ({})", pid, self.task_name(pid)),
                SimEventKind::Exit { pid } => format!("exit    {} ({})", pid, self.task_name(pid)),
                SimEventKind::Preempt { pid } => {
                    format!("preempt {} ({})", pid, self.task_name(pid))
                }
                SimEventKind::Pick { pid } => format!("pick    {} ({})", pid, self.task_name(pid)),
            };
            info!("{} {}", FmtTs(e.time), line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_helpers() {
        let mut trace = Trace::new(vec![(Pid(1), "a".into()), (Pid(2), "b".into())]);
        trace.record(0, SimEventKind::SimStart);
        trace.record(0, SimEventKind::Pick { pid: 2 });
        trace.record(5, SimEventKind::Pick { pid: 1 });
        trace.record(9, SimEventKind::Pick { pid: 2 });

        assert_eq!(trace.picks_of(2), vec![0, 9]);
        assert_eq!(trace.first_pick_order(), vec![2, 1]);
        assert_eq!(trace.task_name(1), "a");
        assert_eq!(trace.task_name(7), "???");
    }
}
