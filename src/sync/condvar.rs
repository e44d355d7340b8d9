//! Condition variable (spec.md §2 "Synchronization primitives").
//!
//! Built on top of [`super::lock::Lock`] and a private per-waiter
//! [`super::semaphore::Semaphore`], the same layering the teacher's
//! blocking primitives use (`sync::once_lock` over `spin::Mutex`): each
//! `wait` call parks on its own one-shot semaphore rather than a shared
//! counting one, so `notify_one` wakes exactly one specific waiter instead
//! of racing on a shared count.

extern crate alloc;

use alloc::vec::Vec;

use spin::Mutex as SpinMutex;

use super::{lock::Lock, semaphore::Semaphore};

struct Waiter {
    sema: Semaphore,
}

pub struct Condvar {
    waiters: SpinMutex<Vec<alloc::sync::Arc<Waiter>>>,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            waiters: SpinMutex::new(Vec::new()),
        }
    }

    /// Atomically release `lock` and block until notified, then
    /// re-acquire `lock` before returning. The caller must hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        let waiter = alloc::sync::Arc::new(Waiter {
            sema: Semaphore::new(0),
        });
        self.waiters.lock().push(waiter.clone());
        lock.release();
        waiter.sema.down();
        lock.acquire();
    }

    /// Wake the longest-waiting blocked thread, if any.
    pub fn notify_one(&self) {
        let woken = {
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                None
            } else {
                Some(waiters.remove(0))
            }
        };
        if let Some(w) = woken {
            w.sema.up();
        }
    }

    /// Wake every thread currently blocked in `wait`.
    pub fn notify_all(&self) {
        let drained: Vec<_> = core::mem::take(&mut *self.waiters.lock());
        for w in drained {
            w.sema.up();
        }
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}
