//! Centralized scheduler context object (spec.md §9 "Global mutable state
//! ... Centralize in a scheduler context object").
//!
//! Owns every piece of shared scheduling state the teacher spreads across
//! free functions and file-scope statics: the thread table, the ready and
//! sleep queues, the lock ownership table used for priority donation, and
//! the MLFQS accounting. All access goes through `&mut Scheduler` methods;
//! callers guard the whole object with [`crate::arch::InterruptGuard`] or
//! the scheduler's own spinlock (see [`super::SCHEDULER`]).

extern crate alloc;

use alloc::{collections::BTreeMap, string::String, vec::Vec};

use crate::config::KernelConfig;

use super::{
    mlfqs::Fixed,
    queue::{ReadyQueue, SleepQueue},
    thread::{clamp_priority, LockId, Status, Thread, Tid, PRI_MAX},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedAlgorithm {
    Priority,
    Mlfqs,
}

struct LockRecord {
    owner: Option<Tid>,
}

/// Maximum transitive donation chain length (spec.md §9: "bounded by a
/// constant depth (8 is adequate)").
const MAX_DONATION_DEPTH: u32 = 8;

/// Ticks before MLFQS recomputes every thread's priority (spec.md §4.1).
const PRIORITY_RECALC_PERIOD: u64 = 4;
/// Ticks a running thread may hold the CPU before preemption (spec.md §4.1).
const TIME_SLICE_TICKS: u32 = 4;

pub struct Scheduler {
    threads: BTreeMap<Tid, Thread>,
    /// Insertion-ordered list of every thread ever created, alive or not
    /// yet reaped — the "all-threads list" (spec.md §2), used by MLFQS's
    /// whole-system recompute passes.
    all_threads: Vec<Tid>,
    ready: ReadyQueue,
    sleep: SleepQueue,
    locks: BTreeMap<LockId, LockRecord>,

    current: Option<Tid>,
    idle: Option<Tid>,

    pub algorithm: SchedAlgorithm,
    timer_freq: u32,

    ticks: u64,
    load_avg: Fixed,

    /// Set when some event means the running thread should yield; deferred
    /// to interrupt return if raised from interrupt context (spec.md
    /// §4.1 priority mode).
    reschedule_requested: bool,
    in_interrupt: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            all_threads: Vec::new(),
            ready: ReadyQueue::new(),
            sleep: SleepQueue::new(),
            locks: BTreeMap::new(),
            current: None,
            idle: None,
            algorithm: SchedAlgorithm::Priority,
            timer_freq: crate::config::DEFAULT_TIMER_FREQ,
            ticks: 0,
            load_avg: Fixed::ZERO,
            reschedule_requested: false,
            in_interrupt: false,
        }
    }

    pub fn configure(&mut self, config: &KernelConfig) {
        self.algorithm = if config.mlfqs {
            SchedAlgorithm::Mlfqs
        } else {
            SchedAlgorithm::Priority
        };
        self.timer_freq = config.timer_freq;
    }

    /// Register the idle thread. Must be called once during boot, after
    /// the idle `Thread` itself has been inserted via [`Self::spawn`].
    pub fn set_idle(&mut self, idle: Tid) {
        self.idle = Some(idle);
        self.current = Some(idle);
        if let Some(t) = self.threads.get_mut(&idle) {
            t.status = Status::Running;
        }
    }

    pub fn idle(&self) -> Option<Tid> {
        self.idle
    }

    pub fn current(&self) -> Option<Tid> {
        self.current
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        let t = self.threads.get(&tid)?;
        t.check_canary();
        Some(t)
    }

    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        let t = self.threads.get_mut(&tid)?;
        t.check_canary();
        Some(t)
    }

    /// Temporarily remove a thread from the table so a caller can operate
    /// on it without holding this lock (needed before calling into code
    /// that itself locks [`super::SCHEDULER`], such as frame claiming or
    /// the page-fault handler — `spin::Mutex` is not reentrant). Ready
    /// queue and all-threads-list membership are untouched; this is only
    /// sound for a thread that is not currently parked in either, i.e.
    /// the running thread. Restore it with [`Self::put_thread`].
    pub fn take_thread(&mut self, tid: Tid) -> Option<Thread> {
        let t = self.threads.remove(&tid)?;
        t.check_canary();
        Some(t)
    }

    /// Restore a thread removed via [`Self::take_thread`].
    pub fn put_thread(&mut self, thread: Thread) {
        self.threads.insert(thread.id, thread);
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    // ---- thread lifecycle ----------------------------------------------

    /// Insert a freshly built thread (status `Blocked`) into the thread
    /// table without making it runnable. Returns its id.
    pub fn spawn(&mut self, thread: Thread) -> Tid {
        let tid = thread.id;
        self.all_threads.push(tid);
        self.threads.insert(tid, thread);
        tid
    }

    /// Create and immediately unblock a new thread of the given name and
    /// base priority (spec.md §4.2 create-initial / thread-create).
    pub fn create_thread(&mut self, name: String, priority: u8) -> Tid {
        let thread = Thread::new(name, clamp_priority(priority as i32));
        let tid = self.spawn(thread);
        self.unblock(tid);
        tid
    }

    /// Move a `Blocked` thread to `Ready` and enqueue it. If this raises
    /// the ready set's max priority above the running thread's effective
    /// priority (priority mode), request a yield (spec.md §4.1).
    pub fn unblock(&mut self, tid: Tid) {
        let Some(priority) = self.threads.get_mut(&tid).map(|t| {
            t.status = Status::Ready;
            t.effective_priority
        }) else {
            return;
        };
        self.ready.push(priority, tid);
        self.maybe_request_yield(priority);
    }

    /// Block the currently running thread with the given status (the
    /// caller is responsible for placing it on whatever wait structure is
    /// appropriate — a semaphore's waiter list or the sleep queue — before
    /// or after calling this). Returns the tid that was running.
    pub fn block_current(&mut self, status: Status) -> Option<Tid> {
        let cur = self.current?;
        if let Some(t) = self.threads.get_mut(&cur) {
            t.status = status;
        }
        Some(cur)
    }

    /// Put the current thread back on the ready queue and dispatch the
    /// next highest-priority runnable thread (spec.md §4.1).
    pub fn yield_now(&mut self) -> Option<Tid> {
        if let Some(cur) = self.current {
            if Some(cur) != self.idle {
                let priority = self
                    .threads
                    .get(&cur)
                    .map(|t| t.effective_priority)
                    .unwrap_or(0);
                if let Some(t) = self.threads.get_mut(&cur) {
                    t.status = Status::Ready;
                    t.ticks_this_slice = 0;
                }
                self.ready.push(priority, cur);
            }
        }
        self.dispatch()
    }

    /// Pick the next thread to run (highest-priority ready thread, or
    /// idle if the ready queue is empty) and mark it running. Does not by
    /// itself perform the CPU context switch — callers combine this with
    /// [`crate::arch::x86_64::context::switch_context`].
    pub fn dispatch(&mut self) -> Option<Tid> {
        let next = self.ready.pop_highest().or(self.idle);
        if let Some(tid) = next {
            if let Some(t) = self.threads.get_mut(&tid) {
                t.check_canary();
                t.status = Status::Running;
            }
        }
        self.current = next;
        self.reschedule_requested = false;
        next
    }

    /// Remove a thread from the thread table entirely, dropping its
    /// kernel stack, fd table, and SPT (spec.md §4.2 Exit / Wait: "signals
    /// its exit_sema to let its memory be reclaimed").
    pub fn destroy_thread(&mut self, tid: Tid) {
        if let Some(t) = self.threads.get(&tid) {
            self.ready.remove(t.effective_priority, tid);
        }
        self.threads.remove(&tid);
        self.all_threads.retain(|&t| t != tid);
    }

    pub fn for_each_thread(&self, mut f: impl FnMut(&Thread)) {
        for &tid in &self.all_threads {
            if let Some(t) = self.threads.get(&tid) {
                f(t);
            }
        }
    }

    // ---- sleep ----------------------------------------------------------

    /// `sleep_until`: insert into the sleep queue and block. Caller must
    /// then actually switch away from `tid` (interrupts are assumed
    /// already disabled, per spec.md §4.1).
    pub fn sleep_until(&mut self, tid: Tid, wakeup_tick: u64) {
        if wakeup_tick <= self.ticks {
            // spec.md §8: sleep_until(now) returns immediately -- never
            // actually enqueue.
            return;
        }
        if let Some(t) = self.threads.get_mut(&tid) {
            t.wakeup_tick = Some(wakeup_tick);
            t.status = Status::Blocked;
        }
        self.sleep.insert(wakeup_tick, tid);
    }

    /// Called once per timer tick. Wakes due sleepers, runs MLFQS
    /// accounting, and marks the running thread for preemption once its
    /// time slice is exhausted. Returns `true` if the interrupt-return
    /// path should yield.
    pub fn on_tick(&mut self) -> bool {
        self.ticks += 1;
        self.in_interrupt = true;

        let due = self.sleep.drain_due(self.ticks);
        for tid in due {
            if let Some(t) = self.threads.get_mut(&tid) {
                t.wakeup_tick = None;
            }
            self.unblock(tid);
        }

        if self.algorithm == SchedAlgorithm::Mlfqs {
            self.mlfqs_on_tick();
        }

        let mut should_preempt = false;
        if let Some(cur) = self.current {
            if Some(cur) != self.idle {
                if let Some(t) = self.threads.get_mut(&cur) {
                    t.ticks_this_slice += 1;
                    if t.ticks_this_slice >= TIME_SLICE_TICKS {
                        should_preempt = true;
                    }
                }
            }
        }
        if should_preempt {
            self.reschedule_requested = true;
        }

        self.in_interrupt = false;
        self.take_reschedule()
    }

    fn mlfqs_on_tick(&mut self) {
        if let Some(cur) = self.current {
            if Some(cur) != self.idle {
                if let Some(t) = self.threads.get_mut(&cur) {
                    t.recent_cpu = t.recent_cpu.add_int(1);
                }
            }
        }

        if self.ticks % PRIORITY_RECALC_PERIOD == 0 {
            self.mlfqs_recompute_all_priorities();
        }

        if self.ticks % self.timer_freq as u64 == 0 {
            self.mlfqs_recompute_load_avg_and_recent_cpu();
        }
    }

    /// Recompute a single thread's MLFQS priority immediately (used by
    /// `thread_set_nice`, SPEC_FULL §3), re-bucketing and requesting a
    /// yield if warranted rather than waiting for the next 4-tick sweep.
    pub fn recompute_mlfqs_priority(&mut self, tid: Tid) {
        let Some((recent_cpu, nice, old_priority, status)) = self
            .threads
            .get(&tid)
            .map(|t| (t.recent_cpu, t.nice, t.effective_priority, t.status))
        else {
            return;
        };
        let new_priority = mlfqs_priority(recent_cpu, nice).clamp(0, PRI_MAX);
        if let Some(t) = self.threads.get_mut(&tid) {
            t.base_priority = new_priority;
            t.effective_priority = new_priority;
        }
        if status == Status::Ready && old_priority != new_priority {
            self.ready.remove(old_priority, tid);
            self.ready.push(new_priority, tid);
        }
        if new_priority != old_priority {
            self.maybe_request_yield(new_priority);
        }
    }

    fn mlfqs_recompute_all_priorities(&mut self) {
        let tids: Vec<Tid> = self.all_threads.clone();
        for tid in tids {
            let Some((recent_cpu, nice, old_priority, status)) = self
                .threads
                .get(&tid)
                .map(|t| (t.recent_cpu, t.nice, t.effective_priority, t.status))
            else {
                continue;
            };
            let new_priority =
                mlfqs_priority(recent_cpu, nice).clamp(0, PRI_MAX);
            if let Some(t) = self.threads.get_mut(&tid) {
                t.base_priority = new_priority;
                t.effective_priority = new_priority;
            }
            if status == Status::Ready && old_priority != new_priority {
                self.ready.remove(old_priority, tid);
                self.ready.push(new_priority, tid);
            }
        }
    }

    fn mlfqs_recompute_load_avg_and_recent_cpu(&mut self) {
        let ready_threads = self.ready.ready_count() as i64
            + if self.current.is_some() && self.current != self.idle {
                1
            } else {
                0
            };
        let fifty_nine_sixtieths = Fixed::from_int(59).div(Fixed::from_int(60));
        let one_sixtieth = Fixed::from_int(1).div(Fixed::from_int(60));
        self.load_avg = fifty_nine_sixtieths
            .mul(self.load_avg)
            .add(one_sixtieth.mul_int(ready_threads));

        let two_load_avg = self.load_avg.mul_int(2);
        let coeff = two_load_avg.div(two_load_avg.add_int(1));

        let tids: Vec<Tid> = self.all_threads.clone();
        for tid in tids {
            if let Some(t) = self.threads.get_mut(&tid) {
                t.recent_cpu = coeff.mul(t.recent_cpu).add_int(t.nice as i64);
            }
        }
    }

    pub fn load_avg(&self) -> Fixed {
        self.load_avg
    }

    // ---- priority / donation ---------------------------------------------

    pub fn register_lock(&mut self) -> LockId {
        let id = LockId::fresh();
        self.locks.insert(id, LockRecord { owner: None });
        id
    }

    pub fn lock_owner(&self, lock: LockId) -> Option<Tid> {
        self.locks.get(&lock).and_then(|r| r.owner)
    }

    pub fn lock_acquired(&mut self, lock: LockId, owner: Tid) {
        if let Some(r) = self.locks.get_mut(&lock) {
            r.owner = Some(owner);
        }
        if let Some(t) = self.threads.get_mut(&owner) {
            t.wait_on_lock = None;
            t.held_locks.push(lock);
        }
    }

    /// Record that `donor` blocked trying to acquire `lock`, and propagate
    /// its priority transitively to the lock's holder chain (spec.md §4.1
    /// donation rule).
    pub fn donate(&mut self, donor: Tid, lock: LockId) {
        if self.algorithm != SchedAlgorithm::Priority {
            return;
        }
        if let Some(t) = self.threads.get_mut(&donor) {
            t.wait_on_lock = Some(lock);
        }
        self.propagate_donation(donor, lock, 0);
    }

    fn propagate_donation(&mut self, donor: Tid, lock: LockId, depth: u32) {
        if depth >= MAX_DONATION_DEPTH {
            return;
        }
        let Some(holder) = self.lock_owner(lock) else {
            return;
        };
        if let Some(h) = self.threads.get_mut(&holder) {
            if !h.donations.contains(&donor) {
                h.donations.push(donor);
            }
        }
        self.recompute_effective_priority(holder);

        let holder_wait = self.threads.get(&holder).and_then(|t| t.wait_on_lock);
        if let Some(next_lock) = holder_wait {
            self.propagate_donation(holder, next_lock, depth + 1);
        }
    }

    /// Release `lock`, currently held by `releaser`: drop every donor that
    /// was waiting specifically on this lock and recompute the releaser's
    /// effective priority from what remains (spec.md §4.1).
    pub fn release(&mut self, releaser: Tid, lock: LockId) {
        if let Some(r) = self.locks.get_mut(&lock) {
            r.owner = None;
        }
        if let Some(t) = self.threads.get_mut(&releaser) {
            t.held_locks.retain(|&l| l != lock);
        }

        let waiting_on_this: Vec<Tid> = self
            .threads
            .get(&releaser)
            .map(|t| {
                t.donations
                    .iter()
                    .copied()
                    .filter(|&d| self.threads.get(&d).and_then(|dt| dt.wait_on_lock) == Some(lock))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(t) = self.threads.get_mut(&releaser) {
            t.donations.retain(|d| !waiting_on_this.contains(d));
        }

        self.recompute_effective_priority(releaser);
    }

    /// Recompute `tid`'s effective priority from its base priority and
    /// current donor set, re-bucketing it in the ready queue if needed,
    /// and requesting a yield if this newly exceeds the running thread.
    ///
    /// Delegates the actual `max(base, max over donors)` rule to
    /// [`Thread::recompute_effective_priority`]: `tid`'s control block is
    /// taken out of `self.threads` for the duration so the donor-priority
    /// closure can borrow the table immutably while `tid` itself is held
    /// mutably outside it, then put back.
    pub fn recompute_effective_priority(&mut self, tid: Tid) {
        let Some(mut thread) = self.threads.remove(&tid) else {
            return;
        };
        let old_priority = thread.effective_priority;
        let status = thread.status;

        thread.recompute_effective_priority(|donor| {
            self.threads.get(&donor).map(|t| t.effective_priority).unwrap_or(0)
        });
        let new_priority = thread.effective_priority;

        self.threads.insert(tid, thread);

        if status == Status::Ready && old_priority != new_priority {
            self.ready.remove(old_priority, tid);
            self.ready.push(new_priority, tid);
        }

        if new_priority != old_priority {
            self.maybe_request_yield(new_priority);
        }
    }

    /// Set a thread's base priority (`set_priority` syscall-adjacent
    /// debug call); may cause an immediate yield (spec.md §4.1).
    pub fn set_base_priority(&mut self, tid: Tid, new_base: u8) {
        if let Some(t) = self.threads.get_mut(&tid) {
            t.base_priority = new_base;
        }
        self.recompute_effective_priority(tid);
    }

    fn maybe_request_yield(&mut self, candidate_priority: u8) {
        if self.algorithm != SchedAlgorithm::Priority {
            return;
        }
        let Some(cur) = self.current else {
            return;
        };
        if Some(cur) == self.idle {
            self.reschedule_requested = true;
            return;
        }
        let cur_priority = self
            .threads
            .get(&cur)
            .map(|t| t.effective_priority)
            .unwrap_or(0);
        if candidate_priority > cur_priority {
            self.reschedule_requested = true;
        }
    }

    /// Consume the deferred-yield flag. If currently in interrupt context
    /// the yield stays deferred to interrupt return (spec.md §4.1).
    pub fn take_reschedule(&mut self) -> bool {
        if self.in_interrupt {
            return false;
        }
        let requested = self.reschedule_requested;
        self.reschedule_requested = false;
        requested
    }

    pub fn reschedule_requested(&self) -> bool {
        self.reschedule_requested
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// `priority = PRI_MAX − recent_cpu/4 − nice·2`, clamped to `[0, 63]`
/// (spec.md §4.1 MLFQS mode).
fn mlfqs_priority(recent_cpu: Fixed, nice: i32) -> u8 {
    let p = Fixed::from_int(PRI_MAX as i64)
        .sub(recent_cpu.div_int(4))
        .sub_int((nice * 2) as i64);
    clamp_priority(p.to_int_round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_scheduler() -> Scheduler {
        let mut s = Scheduler::new();
        let idle = s.spawn(Thread::new(String::from("idle"), 0));
        s.set_idle(idle);
        s
    }

    #[test]
    fn three_priorities_run_highest_first() {
        let mut s = fresh_scheduler();
        let low = s.create_thread(String::from("low"), 20);
        let mid = s.create_thread(String::from("mid"), 30);
        let high = s.create_thread(String::from("high"), 31);

        assert_eq!(s.dispatch(), Some(high));
        s.block_current(Status::Dying);
        assert_eq!(s.dispatch(), Some(mid));
        s.block_current(Status::Dying);
        assert_eq!(s.dispatch(), Some(low));
    }

    #[test]
    fn donation_raises_and_restores_holder_priority() {
        let mut s = fresh_scheduler();
        let low = s.create_thread(String::from("L"), 20);
        let high = s.create_thread(String::from("H"), 40);
        let lock = s.register_lock();

        s.lock_acquired(lock, low);
        assert_eq!(s.thread(low).unwrap().effective_priority, 20);

        s.donate(high, lock);
        assert_eq!(s.thread(low).unwrap().effective_priority, 40);

        s.release(low, lock);
        assert_eq!(s.thread(low).unwrap().effective_priority, 20);
    }

    #[test]
    fn transitive_donation_propagates_through_chain() {
        let mut s = fresh_scheduler();
        let l1 = s.create_thread(String::from("L1"), 10);
        let l2 = s.create_thread(String::from("L2"), 20);
        let h = s.create_thread(String::from("H"), 50);

        let lock_a = s.register_lock();
        let lock_b = s.register_lock();
        s.lock_acquired(lock_a, l1);
        s.lock_acquired(lock_b, l2);

        // l2 blocks on lock_a (held by l1); h blocks on lock_b (held by l2).
        s.donate(l2, lock_a);
        assert_eq!(s.thread(l1).unwrap().effective_priority, 20);

        s.donate(h, lock_b);
        assert_eq!(s.thread(l2).unwrap().effective_priority, 50);
        // transitive: l1 should now also see 50 since l2 (waiting on lock_a) inherited it.
        assert_eq!(s.thread(l1).unwrap().effective_priority, 50);
    }

    #[test]
    fn sleep_until_now_returns_immediately() {
        let mut s = fresh_scheduler();
        let t = s.create_thread(String::from("sleeper"), 31);
        s.block_current(Status::Dying); // pretend t isn't current; just testing queue directly
        let ticks = s.tick_count();
        s.sleep_until(t, ticks);
        // since wakeup <= now, it must not have been enqueued as blocked
        assert_eq!(s.thread(t).unwrap().status, Status::Ready);
    }

    #[test]
    fn mlfqs_priority_formula() {
        // recent_cpu = 0, nice = 0 -> PRI_MAX
        assert_eq!(mlfqs_priority(Fixed::ZERO, 0), PRI_MAX);
        // recent_cpu = 4*4=16 -> PRI_MAX - 4
        assert_eq!(mlfqs_priority(Fixed::from_int(16), 0), PRI_MAX - 4);
    }
}
