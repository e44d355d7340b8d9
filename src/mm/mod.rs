//! Virtual memory: supplemental page tables, frame table + clock
//! eviction, anonymous swap, file-backed mmap, and the page-fault handler
//! (spec.md §4.5).
//!
//! Per spec.md §9 ("Global mutable state... Centralize in... a VM context
//! object initialized at boot"), the frame table and swap table live in
//! one [`VmContext`] behind a single global lock rather than as separate
//! file-scope statics.

pub mod fault;
pub mod file_backed;
pub mod fork;
pub mod frame;
pub mod mmap;
pub mod page_table;
pub mod spt;
pub mod swap;

extern crate alloc;

use alloc::sync::Arc;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::devices::BlockDevice;
use crate::fs::FileSystem;
use crate::sched::thread::Thread;

use frame::FrameTable;
use spt::PageKind;
use swap::SwapTable;

/// Page size, fixed for this kernel (spec.md throughout).
pub const PGSIZE: usize = 4096;

/// Top of the user address space; the initial stack pointer after exec
/// (spec.md §4.3, §6).
pub const USER_STACK: u64 = 0x0000_7000_0000_0000;

/// Lowest address the kernel occupies; every user pointer must fall
/// strictly below this (spec.md §4.4 user-pointer validation).
pub const KERNEL_BASE: u64 = 0xFFFF_8000_0000_0000;

/// How far below `USER_STACK` on-demand stack growth is allowed (spec.md
/// §4.5 fault handling step 2: "within 1 MiB of USER_STACK").
pub const STACK_GROWTH_LIMIT: u64 = 1024 * 1024;

/// Slack below the user stack pointer a fault may still legitimately be a
/// stack-growth access (covers `push`-family instructions that write
/// below `rsp` before it is adjusted).
pub const STACK_FAULT_SLACK: u64 = 32;

/// Default number of frames in the user pool absent a test override.
pub const DEFAULT_USER_POOL_FRAMES: usize = 64;
/// Default swap device size in pages.
pub const DEFAULT_SWAP_PAGES: usize = 256;

pub fn page_round_down(addr: u64) -> u64 {
    addr & !((PGSIZE as u64) - 1)
}

pub fn page_round_up(addr: u64) -> u64 {
    page_round_down(addr + PGSIZE as u64 - 1)
}

pub fn is_page_aligned(addr: u64) -> bool {
    addr % PGSIZE as u64 == 0
}

/// The VM core's global mutable state (spec.md §9): the frame table, the
/// swap bitmap, and the pluggable block device / file-system boundaries
/// they run against.
pub struct VmContext {
    pub frames: FrameTable,
    pub swap: SwapTable,
    block_device: Option<Arc<dyn BlockDevice>>,
    filesystem: Option<Arc<dyn FileSystem>>,
}

impl VmContext {
    fn new() -> Self {
        Self {
            frames: FrameTable::new(DEFAULT_USER_POOL_FRAMES),
            swap: SwapTable::new(DEFAULT_SWAP_PAGES),
            block_device: None,
            filesystem: None,
        }
    }

    /// Boot glue (or a test) installs the swap disk once.
    pub fn set_block_device(&mut self, dev: Arc<dyn BlockDevice>) {
        self.block_device = Some(dev);
    }

    /// Boot glue (or a test) installs the file-system boundary once.
    pub fn set_filesystem(&mut self, fs: Arc<dyn FileSystem>) {
        self.filesystem = Some(fs);
    }

    pub fn block_device(&self) -> Arc<dyn BlockDevice> {
        self.block_device
            .clone()
            .expect("swap block device not initialized")
    }

    pub fn filesystem(&self) -> Arc<dyn FileSystem> {
        self.filesystem
            .clone()
            .expect("filesystem not initialized")
    }

    /// Test-only: replace the frame pool with a smaller one, to exercise
    /// eviction without allocating the default 64-frame pool (spec.md §8
    /// end-to-end scenario 6: "With only 4 user frames available...").
    pub fn reinit_frame_pool(&mut self, frames: usize) {
        self.frames = FrameTable::new(frames);
    }
}

lazy_static! {
    pub static ref VM: Mutex<VmContext> = Mutex::new(VmContext::new());
}

/// Tear down a process's address space (spec.md §4.5: "Destruction of the
/// SPT invokes the per-kind destructor for each entry then releases the
/// table's internal storage, preserving the table shell"), used by both
/// process exit and exec (spec.md §4.2). Per entry: an anon page still
/// holding a swap slot frees it; a resident file-backed page writes back
/// its content if the hardware dirty bit is set; any entry still holding a
/// frame releases it and drops the hardware mapping. `thread.spt` ends up
/// `Some(empty table)`, not `None` — callers that immediately re-populate
/// it (exec) rely on the table existing.
///
/// Does not lock [`super::sched::SCHEDULER`] itself: callers already hold
/// `&mut Thread` outside the thread table (via
/// [`crate::sched::scheduler::Scheduler::take_thread`] or because the
/// thread has not yet been published to it), so only [`VM`] is taken here.
pub fn teardown_address_space(thread: &mut Thread) {
    let Some(mut spt) = thread.spt.take() else {
        return;
    };
    let mut vm = VM.lock();

    for vpage in spt.vpages() {
        let entry = spt
            .remove(vpage)
            .expect("vpages() returned a page not actually in the table");

        match &entry.kind {
            PageKind::Anon(a) => {
                if let Some(slot) = a.slot {
                    vm.swap.free_slot(slot);
                }
            }
            PageKind::File(f) => {
                if let Some(frame_id) = entry.frame {
                    let dirty = thread.page_table.is_dirty(vpage);
                    let content = *vm.frames.content(frame_id);
                    file_backed::write_back_if_dirty(f, &content, dirty);
                }
            }
            PageKind::Uninit(_) => {}
        }

        if let Some(frame_id) = entry.frame {
            vm.frames.clear_owner(frame_id);
            thread.page_table.unmap(vpage);
        }
    }

    thread.spt = Some(spt);
}
