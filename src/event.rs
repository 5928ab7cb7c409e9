//! Scheduled events and the time-ordered event queue.
//!
//! The queue is the single owner of in-flight events. Tasks refer to their
//! pending event through stable [`EventHandle`]s (generation counter plus
//! arena index), so a handle held across a delete can never resurrect a
//! recycled slot.
//!
//! Ordering: events at distinct times are strictly time-ordered; events at
//! the same time form a FIFO bucket and pop in insertion order. Deletion by
//! handle is `O(log n)`.

use std::collections::{BTreeMap, VecDeque};

use crate::error::SimError;
use crate::types::{EventHandle, TaskId, TimeNs};

/// Why an exit event was generated: which switch condition of the final
/// behaviour entry produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// Simulated-time threshold (`sim_exec`).
    SimExec,
    /// Cumulative-CPU-time threshold (`proc_exec`).
    ProcExec,
    /// Dispatch-count threshold (`exec_count`).
    ExecCount,
}

/// The tagged sum of queueable event variants.
///
/// `Pick` records exist only in the result log (see [`crate::trace`]);
/// they are never inserted into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The simulation begins; triggers the first dispatch.
    SimStart,
    /// The simulation ends at `sim_len`.
    SimStop,
    /// A registered task spawns.
    Fork { task: TaskId },
    /// A blocked task becomes runnable again.
    Enqueue { task: TaskId },
    /// The running task's burst ends and it blocks.
    Block { task: TaskId },
    /// A task exits. `nice` exits wait for the burst; strict exits fire
    /// unconditionally.
    Exit {
        task: TaskId,
        cause: ExitCause,
        nice: bool,
    },
    /// Periodic scheduler tick.
    Timer,
}

impl EventKind {
    /// The task this event targets, if any.
    pub fn task(&self) -> Option<TaskId> {
        match *self {
            EventKind::Fork { task }
            | EventKind::Enqueue { task }
            | EventKind::Block { task }
            | EventKind::Exit { task, .. } => Some(task),
            EventKind::SimStart | EventKind::SimStop | EventKind::Timer => None,
        }
    }
}

/// A scheduled event: the instant it fires and the instant it was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub time: TimeNs,
    pub set_on: TimeNs,
    pub kind: EventKind,
}

/// One arena slot. The generation advances on every free, invalidating
/// outstanding handles.
#[derive(Debug)]
struct Slot {
    generation: u32,
    event: Option<Event>,
}

/// The per-timestamp entry: a scalar for the common single-event case,
/// flattened back from a bucket when it shrinks to one element.
#[derive(Debug)]
enum TimeSlot {
    Single(EventHandle),
    Bucket(VecDeque<EventHandle>),
}

/// Time-ordered event queue with stable delete-by-handle.
#[derive(Debug, Default)]
pub struct EventQueue {
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: BTreeMap<TimeNs, TimeSlot>,
    len: usize,
    /// Time of the most recently popped event; inserts behind it are
    /// rejected.
    watermark: TimeNs,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            slots: Vec::new(),
            free: Vec::new(),
            order: BTreeMap::new(),
            len: 0,
            watermark: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Place an event at `event.time`, appending to the FIFO bucket on a
    /// time collision. Rejects events scheduled behind the queue clock.
    pub fn insert(&mut self, event: Event) -> Result<EventHandle, SimError> {
        if event.time < self.watermark {
            return Err(SimError::PastEvent {
                now: self.watermark,
                time: event.time,
            });
        }

        let index = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    event: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.event = Some(event);
        let handle = EventHandle {
            index,
            generation: slot.generation,
        };

        match self.order.remove(&event.time) {
            None => {
                self.order.insert(event.time, TimeSlot::Single(handle));
            }
            Some(TimeSlot::Single(existing)) => {
                let mut bucket = VecDeque::with_capacity(2);
                bucket.push_back(existing);
                bucket.push_back(handle);
                self.order.insert(event.time, TimeSlot::Bucket(bucket));
            }
            Some(TimeSlot::Bucket(mut bucket)) => {
                bucket.push_back(handle);
                self.order.insert(event.time, TimeSlot::Bucket(bucket));
            }
        }
        self.len += 1;
        Ok(handle)
    }

    /// Remove and return the earliest-time, earliest-inserted event.
    pub fn pop_next(&mut self) -> Option<Event> {
        let (&time, _) = self.order.iter().next()?;
        let handle = match self.order.get_mut(&time) {
            Some(TimeSlot::Single(h)) => {
                let h = *h;
                self.order.remove(&time);
                h
            }
            Some(TimeSlot::Bucket(bucket)) => {
                let h = bucket.pop_front().expect("bucket never empty");
                if bucket.len() == 1 {
                    let last = bucket[0];
                    self.order.insert(time, TimeSlot::Single(last));
                }
                h
            }
            None => unreachable!(),
        };
        let event = self.release(handle).expect("queued handle is live");
        self.watermark = event.time;
        Some(event)
    }

    /// The next event without removing it.
    pub fn peek_next(&self) -> Option<&Event> {
        let (_, slot) = self.order.iter().next()?;
        let handle = match slot {
            TimeSlot::Single(h) => *h,
            TimeSlot::Bucket(bucket) => bucket[0],
        };
        self.get(handle)
    }

    /// Look up a live event by handle. Stale handles resolve to `None`.
    pub fn get(&self, handle: EventHandle) -> Option<&Event> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.event.as_ref()
    }

    pub fn contains(&self, handle: EventHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Delete by handle. Returns the event if the handle was live; a bucket
    /// shrinking to one entry flattens back to a scalar.
    pub fn delete(&mut self, handle: EventHandle) -> Option<Event> {
        let time = self.get(handle)?.time;
        match self.order.get_mut(&time) {
            Some(TimeSlot::Single(h)) => {
                debug_assert_eq!(*h, handle);
                self.order.remove(&time);
            }
            Some(TimeSlot::Bucket(bucket)) => {
                let pos = bucket
                    .iter()
                    .position(|h| *h == handle)
                    .expect("live handle present in its time bucket");
                bucket.remove(pos);
                if bucket.len() == 1 {
                    let last = bucket[0];
                    self.order.insert(time, TimeSlot::Single(last));
                }
            }
            None => unreachable!("live handle has an order entry"),
        }
        self.release(handle)
    }

    /// Free the arena slot behind a handle, bumping its generation.
    fn release(&mut self, handle: EventHandle) -> Option<Event> {
        let slot = &mut self.slots[handle.index as usize];
        debug_assert_eq!(slot.generation, handle.generation);
        let event = slot.event.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(time: TimeNs, kind: EventKind) -> Event {
        Event {
            time,
            set_on: 0,
            kind,
        }
    }

    #[test]
    fn test_pop_in_time_order() {
        let mut q = EventQueue::new();
        q.insert(ev(30, EventKind::Timer)).unwrap();
        q.insert(ev(10, EventKind::SimStart)).unwrap();
        q.insert(ev(20, EventKind::SimStop)).unwrap();

        assert_eq!(q.pop_next().unwrap().time, 10);
        assert_eq!(q.pop_next().unwrap().time, 20);
        assert_eq!(q.pop_next().unwrap().time, 30);
        assert!(q.pop_next().is_none());
    }

    #[test]
    fn test_cotime_fifo() {
        let mut q = EventQueue::new();
        q.insert(ev(5, EventKind::Fork { task: TaskId(1) })).unwrap();
        q.insert(ev(5, EventKind::Fork { task: TaskId(2) })).unwrap();
        q.insert(ev(5, EventKind::Fork { task: TaskId(3) })).unwrap();

        for expect in 1..=3 {
            match q.pop_next().unwrap().kind {
                EventKind::Fork { task } => assert_eq!(task, TaskId(expect)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_delete_by_handle() {
        let mut q = EventQueue::new();
        let _a = q.insert(ev(5, EventKind::Fork { task: TaskId(1) })).unwrap();
        let b = q.insert(ev(5, EventKind::Fork { task: TaskId(2) })).unwrap();
        let _c = q.insert(ev(5, EventKind::Fork { task: TaskId(3) })).unwrap();

        let deleted = q.delete(b).unwrap();
        assert_eq!(deleted.kind, EventKind::Fork { task: TaskId(2) });
        assert_eq!(q.len(), 2);

        // Stale handle: second delete is a no-op.
        assert!(q.delete(b).is_none());

        match q.pop_next().unwrap().kind {
            EventKind::Fork { task } => assert_eq!(task, TaskId(1)),
            other => panic!("unexpected {other:?}"),
        }
        match q.pop_next().unwrap().kind {
            EventKind::Fork { task } => assert_eq!(task, TaskId(3)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bucket_flattens_to_single() {
        let mut q = EventQueue::new();
        let a = q.insert(ev(7, EventKind::Timer)).unwrap();
        let b = q.insert(ev(7, EventKind::SimStop)).unwrap();
        q.delete(a).unwrap();
        // Only b remains at t=7; peek and pop still work.
        assert_eq!(q.peek_next().unwrap().kind, EventKind::SimStop);
        assert!(q.contains(b));
        assert_eq!(q.pop_next().unwrap().kind, EventKind::SimStop);
        assert!(q.is_empty());
    }

    #[test]
    fn test_insert_in_past_rejected() {
        let mut q = EventQueue::new();
        q.insert(ev(10, EventKind::Timer)).unwrap();
        q.pop_next().unwrap();
        assert!(matches!(
            q.insert(ev(5, EventKind::Timer)),
            Err(SimError::PastEvent { now: 10, time: 5 })
        ));
        // At the watermark is fine.
        assert!(q.insert(ev(10, EventKind::Timer)).is_ok());
    }

    #[test]
    fn test_handle_reuse_bumps_generation() {
        let mut q = EventQueue::new();
        let a = q.insert(ev(1, EventKind::Timer)).unwrap();
        q.pop_next().unwrap();
        let b = q.insert(ev(2, EventKind::SimStop)).unwrap();
        // Slot is recycled but the old handle must not see the new event.
        assert_eq!(a.index, b.index);
        assert!(q.get(a).is_none());
        assert!(q.get(b).is_some());
    }
}
