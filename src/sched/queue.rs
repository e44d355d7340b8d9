//! Ready queue and sleep queue (spec.md §4.1, §5 ordering guarantees).

extern crate alloc;

use alloc::collections::VecDeque;

use super::thread::{Tid, PRI_MAX};

/// Ready queue: one FIFO bucket per priority level, scanned from
/// [`PRI_MAX`] down to 0 so the highest-effective-priority thread is
/// always returned first, FIFO among threads of equal priority (spec.md
/// §5: "The ready queue is totally ordered by effective priority; FIFO
/// among ties").
pub struct ReadyQueue {
    buckets: [VecDeque<Tid>; PRI_MAX as usize + 1],
    len: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            buckets: core::array::from_fn(|_| VecDeque::new()),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push(&mut self, priority: u8, tid: Tid) {
        self.buckets[priority as usize].push_back(tid);
        self.len += 1;
    }

    /// Remove and return the highest-priority, earliest-enqueued thread.
    pub fn pop_highest(&mut self) -> Option<Tid> {
        for bucket in self.buckets.iter_mut().rev() {
            if let Some(tid) = bucket.pop_front() {
                self.len -= 1;
                return Some(tid);
            }
        }
        None
    }

    /// Highest priority currently waiting, if any.
    pub fn max_priority(&self) -> Option<u8> {
        self.buckets
            .iter()
            .enumerate()
            .rev()
            .find(|(_, b)| !b.is_empty())
            .map(|(p, _)| p as u8)
    }

    /// Remove a specific thread (used when its priority changes and it
    /// must be re-bucketed, or MLFQS recompute moves it).
    pub fn remove(&mut self, priority: u8, tid: Tid) -> bool {
        let bucket = &mut self.buckets[priority as usize];
        if let Some(pos) = bucket.iter().position(|&t| t == tid) {
            bucket.remove(pos);
            self.len -= 1;
            true
        } else {
            false
        }
    }

    /// Count of ready threads, for MLFQS `load_avg` accounting.
    pub fn ready_count(&self) -> usize {
        self.len
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// An entry in the sleep queue.
struct SleepEntry {
    wakeup_tick: u64,
    tid: Tid,
}

/// Threads blocked in `sleep_until`, ordered by wakeup tick ascending;
/// ties broken by insertion order (spec.md §5).
pub struct SleepQueue {
    entries: alloc::vec::Vec<SleepEntry>,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self {
            entries: alloc::vec::Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert keeping the list sorted ascending by wakeup tick; among
    /// equal ticks, new entries go after existing ones (FIFO).
    pub fn insert(&mut self, wakeup_tick: u64, tid: Tid) {
        let pos = self
            .entries
            .partition_point(|e| e.wakeup_tick <= wakeup_tick);
        self.entries.insert(pos, SleepEntry { wakeup_tick, tid });
    }

    /// Pop every entry whose wakeup tick is `<= now`, from the head,
    /// stopping at the first entry beyond `now` (spec.md §4.1 sleep).
    pub fn drain_due(&mut self, now: u64) -> alloc::vec::Vec<Tid> {
        let mut due = alloc::vec::Vec::new();
        while let Some(front) = self.entries.first() {
            if front.wakeup_tick <= now {
                due.push(self.entries.remove(0).tid);
            } else {
                break;
            }
        }
        due
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}
