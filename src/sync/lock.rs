//! Ownable lock with priority donation (spec.md §3 "Lock", §4.1 donation).

use crate::sched::{thread::LockId, SCHEDULER};

use super::semaphore::Semaphore;

/// A lock with exactly one owner at a time, backed by a binary semaphore.
/// Blocking to acquire a lock already held by another thread donates this
/// thread's effective priority to the holder, transitively (spec.md §4.1).
pub struct Lock {
    id: LockId,
    sema: Semaphore,
}

impl Lock {
    pub fn new() -> Self {
        let id = SCHEDULER.lock().register_lock();
        Self {
            id,
            sema: Semaphore::new(1),
        }
    }

    pub fn id(&self) -> LockId {
        self.id
    }

    pub fn is_held_by_current(&self) -> bool {
        let sched = SCHEDULER.lock();
        sched.current().is_some() && sched.lock_owner(self.id) == sched.current()
    }

    /// Acquire the lock, donating priority through the holder chain while
    /// blocked (spec.md §4.1).
    pub fn acquire(&self) {
        let current = SCHEDULER.lock().current();
        if let Some(cur) = current {
            let holder = SCHEDULER.lock().lock_owner(self.id);
            if holder.is_some() {
                SCHEDULER.lock().donate(cur, self.id);
            }
        }
        self.sema.down();
        if let Some(cur) = current {
            SCHEDULER.lock().lock_acquired(self.id, cur);
        }
    }

    /// Non-blocking acquire; returns `true` on success. Does not donate,
    /// since it never blocks.
    pub fn try_acquire(&self) -> bool {
        if !self.sema.try_down() {
            return false;
        }
        if let Some(cur) = SCHEDULER.lock().current() {
            SCHEDULER.lock().lock_acquired(self.id, cur);
        }
        true
    }

    /// Release the lock: drop donors that were waiting specifically on
    /// this lock and recompute the releaser's priority from what remains
    /// (spec.md §4.1).
    pub fn release(&self) {
        if let Some(cur) = SCHEDULER.lock().current() {
            SCHEDULER.lock().release(cur, self.id);
        }
        self.sema.up();
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::thread::Thread;
    use alloc::string::String;
    extern crate alloc;

    #[test]
    fn acquire_release_round_trip_without_contention() {
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let owner = sched.create_thread(String::from("owner"), PRI_DEFAULT_FOR_TEST);
        sched.dispatch(); // make `owner` current, deterministically
        drop(sched);

        let lock = Lock::new();
        lock.acquire();
        assert!(lock.is_held_by_current());
        lock.release();
        assert!(!lock.is_held_by_current());

        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(owner);
        sched.destroy_thread(idle);
    }

    const PRI_DEFAULT_FOR_TEST: u8 = 31;
}
