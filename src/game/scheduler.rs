//! Deferred events on the match's virtual clock
//!
//! Events fire in due-time order, insertion order breaking ties. Cancelled
//! events never fire, and `cancel_all` drops everything still pending.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Handle for cancelling one scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(u64);

#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    pending: HashMap<u64, T>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due_ms: u64, event: T) -> EventId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse((due_ms, seq)));
        self.pending.insert(seq, event);
        EventId(seq)
    }

    pub fn cancel(&mut self, id: EventId) -> Option<T> {
        self.pending.remove(&id.0)
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pop the next event due at or before `now_ms`
    pub fn pop_due(&mut self, now_ms: u64) -> Option<T> {
        while let Some(Reverse((due, seq))) = self.queue.peek().copied() {
            if due > now_ms {
                return None;
            }
            self.queue.pop();
            if let Some(event) = self.pending.remove(&seq) {
                return Some(event);
            }
        }
        None
    }
}
