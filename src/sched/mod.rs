//! Scheduler module: priority queue, MLFQS mode, sleep queue, idle thread.
//!
//! The teacher scatters its scheduler state across file-scope statics; per
//! spec.md §9 ("Centralize in a scheduler context object") this crate
//! instead owns one [`Scheduler`] behind a single global lock, the same
//! `lazy_static! + spin::Mutex` idiom the teacher uses for its other
//! process-wide singletons (`sync::once_lock`).

pub mod mlfqs;
pub mod queue;
pub mod scheduler;
pub mod thread;

extern crate alloc;

use alloc::string::String;
use lazy_static::lazy_static;
use spin::Mutex;

pub use scheduler::{SchedAlgorithm, Scheduler};
pub use thread::{Status, Thread, Tid, PRI_DEFAULT, PRI_MAX, PRI_MIN};

lazy_static! {
    /// The one scheduler context for this (uniprocessor) kernel.
    pub static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

/// Default kernel stack size for a new thread (spec.md §3 "kernel stack").
pub const KERNEL_STACK_SIZE: usize = 4096 * 4;

/// Boot-time setup: apply the parsed [`crate::config::KernelConfig`] and
/// create the idle thread (spec.md §4.1 "Idle thread. Created at start").
pub fn init(config: &crate::config::KernelConfig) -> Tid {
    let mut sched = SCHEDULER.lock();
    sched.configure(config);
    let idle = sched.spawn(Thread::new(String::from("idle"), PRI_MIN));
    sched.set_idle(idle);
    idle
}

/// Yield the CPU voluntarily, re-enqueuing the caller at its current
/// effective priority (spec.md §4.1). Returns the tid that is now running.
pub fn yield_now() -> Option<Tid> {
    let _guard = crate::arch::InterruptGuard::new();
    SCHEDULER.lock().yield_now()
}

/// `timer_sleep(d)`: equivalent to `sleep_until(now + d)` (spec.md §5:
/// "there is no early wakeup").
pub fn timer_sleep(ticks: u64) {
    let _guard = crate::arch::InterruptGuard::new();
    let mut sched = SCHEDULER.lock();
    let Some(cur) = sched.current() else { return };
    let wake_at = sched.tick_count() + ticks;
    sched.sleep_until(cur, wake_at);
    if sched.thread(cur).map(|t| t.status) == Some(Status::Blocked) {
        sched.dispatch();
    }
}

/// Called by the timer interrupt handler on every tick (spec.md §4.1,
/// SPEC_FULL §2 "Timer tick source"). Returns whether the interrupt-return
/// path should yield to a higher-priority thread.
pub fn on_tick() -> bool {
    SCHEDULER.lock().on_tick()
}

/// `thread_get_nice`/`thread_set_nice`/`thread_get_recent_cpu`/
/// `thread_get_load_avg` (SPEC_FULL §3: exposed as first-class scheduler
/// API, not just internal MLFQS bookkeeping).
pub fn get_nice() -> i32 {
    let sched = SCHEDULER.lock();
    sched
        .current()
        .and_then(|t| sched.thread(t))
        .map(|t| t.nice)
        .unwrap_or(0)
}

pub fn set_nice(nice: i32) {
    let mut sched = SCHEDULER.lock();
    if let Some(cur) = sched.current() {
        if let Some(t) = sched.thread_mut(cur) {
            t.nice = nice;
        }
        if sched.algorithm == SchedAlgorithm::Mlfqs {
            sched.recompute_mlfqs_priority(cur);
        }
    }
}

pub fn get_recent_cpu_x100() -> i64 {
    let sched = SCHEDULER.lock();
    sched
        .current()
        .and_then(|t| sched.thread(t))
        .map(|t| t.recent_cpu.times_100_rounded())
        .unwrap_or(0)
}

pub fn get_load_avg_x100() -> i64 {
    SCHEDULER.lock().load_avg().times_100_rounded()
}
