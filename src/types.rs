//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (task slots, process IDs, scheduling classes,
//! event handles) prevent silent index confusion between the engine's three
//! arenas (tasks, policies, events). A type alias for plain nanosecond
//! quantities keeps signatures self-documenting without arithmetic-trait
//! boilerplate.

use std::fmt;

/// Simulated time in nanoseconds. Every time value in the engine is one of
/// these; intervals are sampled down to a single `TimeNs` at consumption.
pub type TimeNs = u64;

/// Process identifier, as reported in results and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a task in the engine's task table. Slot 0 is always the idle
/// task; configured processes occupy the following slots in registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// The idle task's slot.
    pub const IDLE: TaskId = TaskId(0);
}

/// Index of a scheduling class in the engine's policy table.
///
/// Tasks name their policy by `ClassId`, never by reference; the engine
/// mediates every call between tasks and policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

/// Stable handle to a scheduled event: an arena index plus a generation
/// counter. A handle whose generation no longer matches the arena slot is
/// stale and resolves to nothing; deleting twice is therefore harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Virtual runtime for the fair policy: elapsed CPU time rescaled by task
/// weight, in integer nanoseconds.
///
/// Ordering uses wrapping comparison (like the kernel's `time_before64`),
/// so values stay ordered even if a very long run wraps the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vtime(pub u64);

impl PartialOrd for Vtime {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Vtime {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // (s64)(a - b) < 0 means a < b. Wrapping subtraction cast to i64
        // handles overflow correctly.
        (self.0.wrapping_sub(other.0) as i64).cmp(&0)
    }
}

impl fmt::Display for Vtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::fmt::fmt_grouped(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vtime_wrapping_order() {
        assert!(Vtime(1) < Vtime(2));
        assert!(Vtime(u64::MAX) < Vtime(0));
        assert!(Vtime(u64::MAX - 10) < Vtime(5));
        assert_eq!(Vtime(7).cmp(&Vtime(7)), std::cmp::Ordering::Equal);
    }
}
