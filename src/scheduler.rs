//! Deadline queue for the event loop.
//!
//! Tasks are ordered by due time, then by the order they were posted, so
//! two tasks due at the same instant run FIFO and callbacks for one socket
//! or timer fire in the order their events happened.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::events::Task;

struct Entry {
    due_us: u64,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due_us == other.due_us && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap, we want the earliest entry on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due_us
            .cmp(&self.due_us)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending tasks keyed by virtual due time.
#[derive(Default)]
pub(crate) struct Timeline {
    queue: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Timeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Post `task` to run at `due_us`.
    pub(crate) fn post(&mut self, due_us: u64, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry { due_us, seq, task });
    }

    /// Due time of the earliest task.
    pub(crate) fn next_due(&self) -> Option<u64> {
        self.queue.peek().map(|e| e.due_us)
    }

    /// Remove the earliest task if it is due at or before `limit_us`.
    pub(crate) fn pop_due(&mut self, limit_us: u64) -> Option<(u64, Task)> {
        if self.next_due()? > limit_us {
            return None;
        }
        self.queue.pop().map(|e| (e.due_us, e.task))
    }

    /// Drop everything (reset, deep sleep).
    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}
