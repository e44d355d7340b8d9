//! Thread control block (spec.md §3 "Thread").
//!
//! Pintos merges "thread" and "process" into one control block; this
//! kernel keeps that shape — the process-lifecycle fields (fd table,
//! children, parent semaphores) live directly on [`Thread`] rather than in
//! a separate PCB, per spec.md's data model.

extern crate alloc;

use alloc::{boxed::Box, string::String, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use alloc::sync::Arc;

use crate::{
    arch::{CpuContext, InterruptFrame},
    fs::FileHandle,
    mm::{
        page_table::{PageTableOps, SoftPageTable},
        spt::SupplementalPageTable,
    },
    process::fdtable::FdTable,
    sync::semaphore::Semaphore,
};

use super::mlfqs::Fixed;

/// Lowest legal priority.
pub const PRI_MIN: u8 = 0;
/// Priority assigned to new threads absent other instruction.
pub const PRI_DEFAULT: u8 = 31;
/// Highest legal priority.
pub const PRI_MAX: u8 = 63;

/// Magic value stored in [`Thread::canary`] and checked on every
/// dereference in debug builds, guarding against stack-overflow
/// corruption of the control block (SPEC_FULL §3, grounded on Pintos's
/// `ASSERT (is_thread (t))` pattern).
const THREAD_CANARY: u32 = 0xcd6a_bf4b;

/// Unique, monotonically increasing thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub u64);

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

impl Tid {
    pub fn fresh() -> Self {
        Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of a [`crate::sync::lock::Lock`], used only to look a lock's
/// owner up in the scheduler's lock table during donation (spec.md §9:
/// "owned node indices rather than pointers").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u64);

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

impl LockId {
    pub fn fresh() -> Self {
        LockId(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Thread lifecycle status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Ready,
    Blocked,
    Dying,
}

/// Clamp a raw priority value into `[PRI_MIN, PRI_MAX]`.
pub fn clamp_priority(p: i32) -> u8 {
    p.clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

pub struct Thread {
    canary_head: u32,

    pub id: Tid,
    pub name: String,
    pub status: Status,

    pub base_priority: u8,
    pub effective_priority: u8,

    /// MLFQS niceness, default 0.
    pub nice: i32,
    /// MLFQS recent CPU time, 17.14 fixed point.
    pub recent_cpu: Fixed,

    pub kernel_stack: Option<Box<[u8]>>,
    pub context: CpuContext,
    /// Saved register snapshot for the user/kernel boundary.
    pub interrupt_frame: InterruptFrame,
    /// Snapshot of the parent frame taken at fork time, copied into the
    /// child before it starts (spec.md §4.2 Fork).
    pub parent_frame: Option<InterruptFrame>,

    /// Root of this thread's page directory, if it owns a user address
    /// space (kernel-only threads leave this `None`).
    pub page_dir: Option<u64>,
    pub spt: Option<SupplementalPageTable>,
    /// Hardware page-table mapping operations, behind the narrow
    /// [`PageTableOps`] boundary (SPEC_FULL §2: bare-metal and host-test
    /// builds implement this trait differently; actual paging-structure
    /// programming is out of scope, spec.md §1).
    pub page_table: Box<dyn PageTableOps>,

    /// Locks currently held by this thread.
    pub held_locks: Vec<LockId>,
    /// Threads that have donated priority to this thread, because they are
    /// blocked on one of `held_locks`.
    pub donations: Vec<Tid>,
    /// The lock this thread is blocked trying to acquire, if any.
    pub wait_on_lock: Option<LockId>,

    /// Valid only while `status == Blocked` on the sleep queue.
    pub wakeup_tick: Option<u64>,

    /// Ticks consumed in the current scheduling quantum (spec.md §4.1 time slice).
    pub ticks_this_slice: u32,

    pub exit_status: i32,
    pub fd_table: FdTable,
    pub parent: Option<Tid>,
    pub children: Vec<Tid>,
    /// Children this thread has already reaped via `wait` (SPEC_FULL §3:
    /// `reaped` flag distinguishing "not a child" from "already waited").
    pub reaped_children: Vec<Tid>,

    /// The full command line passed to `create_initial`, held until the
    /// loader trampoline (out of scope, spec.md §1) consumes it to call
    /// `exec` (spec.md §4.2 Create-initial).
    pub cmdline: Option<String>,
    /// The running executable's file handle, deny-write for as long as
    /// this thread runs it (spec.md §4.3); closing it at exit re-enables
    /// writes (spec.md §4.2 Exit).
    pub executable: Option<Arc<dyn FileHandle>>,

    /// Signaled by a successful fork/exec, to release the parent blocked
    /// in `fork()`/`exec()` (spec.md §4.2). `Arc`-wrapped because a
    /// parent and child both hold a reference to it across the fork, and
    /// signaling it must not require holding [`super::SCHEDULER`] (whose
    /// mutex is not reentrant) at the same time as the semaphore's own
    /// lock.
    pub load_sema: Arc<Semaphore>,
    /// Signaled by `exit()`, to release a parent blocked in `wait()`.
    pub wait_sema: Arc<Semaphore>,
    /// Signaled by a reaping `wait()`, to release this (dying) thread so
    /// the scheduler may reclaim its page.
    pub exit_sema: Arc<Semaphore>,

    canary_tail: u32,
}

impl Thread {
    pub fn new(name: String, base_priority: u8) -> Self {
        Self {
            canary_head: THREAD_CANARY,
            id: Tid::fresh(),
            name,
            status: Status::Blocked,
            base_priority,
            effective_priority: base_priority,
            nice: 0,
            recent_cpu: Fixed::ZERO,
            kernel_stack: None,
            context: CpuContext::default(),
            interrupt_frame: InterruptFrame::default(),
            parent_frame: None,
            page_dir: None,
            spt: None,
            page_table: Box::new(SoftPageTable::new()),
            held_locks: Vec::new(),
            donations: Vec::new(),
            wait_on_lock: None,
            wakeup_tick: None,
            ticks_this_slice: 0,
            exit_status: 0,
            fd_table: FdTable::new(),
            parent: None,
            children: Vec::new(),
            reaped_children: Vec::new(),
            cmdline: None,
            executable: None,
            load_sema: Arc::new(Semaphore::new(0)),
            wait_sema: Arc::new(Semaphore::new(0)),
            exit_sema: Arc::new(Semaphore::new(0)),
            canary_tail: THREAD_CANARY,
        }
    }

    /// Equivalent of Pintos's `is_thread`: guards against a corrupted
    /// control block (e.g. kernel stack overflow). Fatal per spec.md §7
    /// kind 5 — never reachable from user input.
    pub fn check_canary(&self) {
        debug_assert_eq!(self.canary_head, THREAD_CANARY, "thread control block corrupted");
        debug_assert_eq!(self.canary_tail, THREAD_CANARY, "thread control block corrupted");
    }

    /// Recompute `effective_priority` from `base_priority` and the current
    /// donor set (spec.md §4.1 donation rule): `max(base, max over donors)`.
    /// Callers pass a closure resolving a donor `Tid` to its current
    /// effective priority, since donors live in the scheduler's thread
    /// table, not on `self`.
    pub fn recompute_effective_priority(&mut self, donor_priority: impl Fn(Tid) -> u8) {
        let mut max_donor = self.base_priority;
        for &donor in &self.donations {
            let p = donor_priority(donor);
            if p > max_donor {
                max_donor = p;
            }
        }
        self.effective_priority = max_donor;
    }
}
