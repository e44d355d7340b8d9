//! Counting semaphore (spec.md §2 "Synchronization primitives").

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex;

use crate::{
    arch::InterruptGuard,
    sched::{thread::Tid, SCHEDULER},
};

struct Inner {
    value: u64,
    /// Threads blocked in `down`, FIFO order of arrival. Woken in order of
    /// highest effective priority first (spec.md §5: ordering follows the
    /// ready queue's priority discipline even while parked on a wait
    /// queue), ties broken by arrival order.
    waiters: Vec<Tid>,
}

pub struct Semaphore {
    inner: Mutex<Inner>,
}

impl Semaphore {
    pub fn new(value: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                waiters: Vec::new(),
            }),
        }
    }

    /// P(): block until `value > 0`, then decrement it.
    pub fn down(&self) {
        let _guard = InterruptGuard::new();
        loop {
            let mut inner = self.inner.lock();
            if inner.value > 0 {
                inner.value -= 1;
                return;
            }
            let Some(cur) = SCHEDULER.lock().current() else {
                return;
            };
            inner.waiters.push(cur);
            drop(inner);
            let mut sched = SCHEDULER.lock();
            sched.block_current(crate::sched::thread::Status::Blocked);
            sched.dispatch();
        }
    }

    /// V(): increment the value and wake the highest-priority waiter, if
    /// any (spec.md §4.1: ties broken by arrival order).
    pub fn up(&self) {
        let _guard = InterruptGuard::new();
        let mut inner = self.inner.lock();
        let woken = if inner.waiters.is_empty() {
            None
        } else {
            let mut sched = SCHEDULER.lock();
            let mut best_idx = 0;
            let mut best_priority = sched
                .thread(inner.waiters[0])
                .map(|t| t.effective_priority)
                .unwrap_or(0);
            for (i, &tid) in inner.waiters.iter().enumerate().skip(1) {
                let p = sched.thread(tid).map(|t| t.effective_priority).unwrap_or(0);
                if p > best_priority {
                    best_priority = p;
                    best_idx = i;
                }
            }
            Some(inner.waiters.remove(best_idx))
        };
        inner.value += 1;
        drop(inner);
        if let Some(tid) = woken {
            SCHEDULER.lock().unblock(tid);
        }
    }

    /// Non-blocking attempt; returns `true` if the decrement succeeded.
    pub fn try_down(&self) -> bool {
        let _guard = InterruptGuard::new();
        let mut inner = self.inner.lock();
        if inner.value > 0 {
            inner.value -= 1;
            true
        } else {
            false
        }
    }
}
