//! Page-fault handler and frame acquisition (spec.md §4.5 "Fault
//! handling", "Frame acquisition").

use crate::error::{KernelError, KernelResult};
use crate::sched::scheduler::Scheduler;
use crate::sched::thread::{Thread, Tid};
use crate::sched::SCHEDULER;

use super::{
    frame::{FrameId, FrameOwner},
    is_page_aligned,
    page_round_down,
    spt::{PageKind, SptEntry},
    VmContext, KERNEL_BASE, PGSIZE, STACK_FAULT_SLACK, STACK_GROWTH_LIMIT, USER_STACK, VM,
};

/// Is `fault_addr` a plausible on-demand stack-growth access (spec.md
/// §4.5 step 2)? `user_sp` is the fault frame's stack pointer for a
/// user-mode fault, or the saved user stack pointer at the last syscall
/// entry for a kernel-mode fault (spec.md: "For kernel-mode faults the
/// user stack pointer saved at syscall entry is used instead").
fn is_stack_growth(fault_addr: u64, user_sp: u64) -> bool {
    fault_addr < USER_STACK
        && fault_addr + STACK_FAULT_SLACK >= user_sp
        && fault_addr >= USER_STACK.saturating_sub(STACK_GROWTH_LIMIT)
}

/// Handle a page fault for the given thread (spec.md §4.5 fault
/// handling). `user_sp` is as described in [`is_stack_growth`].
pub fn handle_page_fault(
    thread: &mut Thread,
    fault_addr: u64,
    is_write: bool,
    user_sp: u64,
) -> KernelResult<()> {
    if fault_addr == 0 || fault_addr >= KERNEL_BASE {
        return Err(KernelError::BadUserPointer {
            addr: fault_addr as usize,
        });
    }

    let vpage = page_round_down(fault_addr);

    {
        let spt = thread
            .spt
            .as_mut()
            .ok_or(KernelError::Fatal("page fault in a thread with no SPT"))?;
        if !spt.contains(vpage) {
            if is_stack_growth(fault_addr, user_sp) {
                spt.insert(SptEntry::new_anon_stack(vpage))
                    .expect("stack growth page already mapped");
            } else {
                return Err(KernelError::BadUserPointer {
                    addr: fault_addr as usize,
                });
            }
        }
    }

    let spt = thread.spt.as_ref().unwrap();
    let entry = spt.lookup(vpage).expect("just inserted or already present");
    if is_write && !entry.writable {
        return Err(KernelError::BadUserPointer {
            addr: fault_addr as usize,
        });
    }
    let needs_load = entry.frame.is_none();

    if needs_load {
        load_page(thread, vpage)?;
    }
    Ok(())
}

/// Transition an uninit page to its typed kind (if not already), claim a
/// frame, load its content, and install the hardware mapping (spec.md
/// §4.5 step 4).
fn load_page(thread: &mut Thread, vpage: u64) -> KernelResult<()> {
    let tid = thread.id;

    {
        let spt = thread.spt.as_mut().unwrap();
        let entry = spt.lookup_mut(vpage).unwrap();
        if let PageKind::Uninit(u) = &entry.kind {
            entry.kind = (u.init)();
        }
    }

    let frame_id = claim_frame(tid, vpage)?;
    // Fetched before taking the frame-content borrow below: `block_device`
    // borrows the whole `VmContext`, which would otherwise conflict with
    // a live `&mut vm.frames` borrow.
    let dev = VM.lock().block_device();

    let writable = {
        let spt = thread.spt.as_mut().unwrap();
        let entry = spt.lookup_mut(vpage).unwrap();
        let mut vm = VM.lock();
        let content = vm.frames.content_mut(frame_id);
        match &mut entry.kind {
            PageKind::Anon(a) => super::swap::swap_in(&*dev, &mut vm.swap, a, content),
            PageKind::File(f) => super::file_backed::swap_in(f, content),
            PageKind::Uninit(_) => unreachable!("just transitioned out of uninit"),
        }
        entry.frame = Some(frame_id);
        entry.writable
    };

    thread
        .page_table
        .map(vpage, frame_addr(frame_id), writable);
    // The fault that got us here is itself an access; mark it so the
    // clock hand's accessed-bit second chance sees this page as resident
    // and touched rather than evicting it on the very next pass.
    thread.page_table.mark_accessed(vpage);
    Ok(())
}

/// A synthetic "kernel virtual address of the physical page" derived from
/// the frame id (see [`super::frame::FrameTable`] doc comment: this
/// crate owns frame content directly rather than identity-mapping real
/// physical memory).
pub fn frame_addr(id: FrameId) -> u64 {
    (id.0 as u64) * PGSIZE as u64 + 1 // +1 so frame 0 isn't the null address
}

/// Invert [`frame_addr`]: recover the frame id a hardware mapping's stored
/// address refers to (used by the syscall dispatcher to reach a validated
/// user buffer's backing bytes via [`super::frame::FrameTable::content`]).
pub fn frame_id_from_addr(addr: u64) -> FrameId {
    FrameId(((addr - 1) / PGSIZE as u64) as usize)
}

/// Claim a frame for `(owner_tid, vpage)`: allocate from the free pool,
/// or evict a clock-selected victim (spec.md §4.5 "Frame acquisition").
/// Lock order is always [`SCHEDULER`] before [`VM`], since eviction needs
/// to inspect and mutate an arbitrary victim thread's page table while
/// holding the frame table lock.
pub fn claim_frame(owner_tid: Tid, vpage: u64) -> KernelResult<FrameId> {
    let mut sched = SCHEDULER.lock();
    let mut vm = VM.lock();
    claim_frame_locked(&mut sched, &mut vm, owner_tid, vpage)
}

/// The logic of [`claim_frame`], for callers that already hold both
/// [`SCHEDULER`] and [`VM`] (e.g. the fork SPT-copy path in
/// [`super::fork::copy_address_space`], which must hold both locks across
/// the whole copy so a victim selected mid-copy can never be one of the
/// pages the copy itself just installed).
pub fn claim_frame_locked(
    sched: &mut Scheduler,
    vm: &mut VmContext,
    owner_tid: Tid,
    vpage: u64,
) -> KernelResult<FrameId> {
    let owner = FrameOwner {
        tid: owner_tid,
        vpage,
    };

    if let Some(id) = vm.frames.alloc(owner) {
        return Ok(id);
    }

    let victim = vm.frames.select_victim(|o| {
        if let Some(t) = sched.thread_mut(o.tid) {
            if t.page_table.is_accessed(o.vpage) {
                t.page_table.clear_accessed(o.vpage);
                return true;
            }
        }
        false
    });
    let victim_owner = vm
        .frames
        .owner(victim)
        .expect("clock selected a slot with no owner to evict");

    let dirty = sched
        .thread(victim_owner.tid)
        .map(|t| t.page_table.is_dirty(victim_owner.vpage))
        .unwrap_or(false);
    let content = *vm.frames.content(victim);
    let dev = vm.block_device();

    if let Some(victim_thread) = sched.thread_mut(victim_owner.tid) {
        let spt = victim_thread
            .spt
            .as_mut()
            .expect("evicted frame's owner has no SPT");
        let entry = spt
            .lookup_mut(victim_owner.vpage)
            .expect("evicted frame's SPT entry vanished");
        match &mut entry.kind {
            PageKind::Anon(a) => {
                super::swap::swap_out(&*dev, &mut vm.swap, a, &content)?;
            }
            PageKind::File(f) => {
                super::file_backed::write_back_if_dirty(f, &content, dirty);
            }
            PageKind::Uninit(_) => unreachable!("uninit page cannot hold a frame"),
        }
        entry.frame = None;
        victim_thread.page_table.unmap(victim_owner.vpage);
    }

    vm.frames.set_owner(victim, owner);
    Ok(victim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::spt::SupplementalPageTable;
    use crate::sched::thread::Thread;
    use crate::test_support::SERIAL;
    use alloc::string::String;

    fn fresh_user_thread(name: &str) -> Thread {
        let mut t = Thread::new(String::from(name), 31);
        t.spt = Some(SupplementalPageTable::new());
        t
    }

    #[test]
    fn stack_growth_installs_anon_page_within_limit() {
        let _serial = SERIAL.lock();
        VM.lock().set_block_device(alloc::sync::Arc::new(
            crate::devices::MemoryBlockDevice::new(4096),
        ));
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let tid = sched.spawn(fresh_user_thread("stacker"));
        // `handle_page_fault`'s success path calls `claim_frame`, which
        // locks SCHEDULER itself, so the thread must be taken out of the
        // table first rather than faulted on through a held `thread_mut`
        // borrow (same rule `process::exec` follows for the ELF loader).
        let mut thread = sched.take_thread(tid).unwrap();
        drop(sched);

        let sp = USER_STACK - 4;
        let fault_addr = USER_STACK - 4;
        handle_page_fault(&mut thread, fault_addr, true, sp).unwrap();
        assert!(thread.spt.as_ref().unwrap().contains(fault_addr));
        assert!(thread.page_table.is_present(page_round_down(fault_addr)));

        let mut sched = SCHEDULER.lock();
        sched.put_thread(thread);
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn fault_far_below_stack_pointer_is_rejected() {
        let _serial = SERIAL.lock();
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let tid = sched.spawn(fresh_user_thread("bad"));
        let thread = sched.thread_mut(tid).unwrap();
        let sp = USER_STACK - 4;
        let far_addr = USER_STACK - STACK_GROWTH_LIMIT - PGSIZE as u64;
        assert!(handle_page_fault(thread, far_addr, true, sp).is_err());
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn null_and_kernel_addresses_are_rejected() {
        let _serial = SERIAL.lock();
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let tid = sched.spawn(fresh_user_thread("n"));
        let thread = sched.thread_mut(tid).unwrap();
        assert!(handle_page_fault(thread, 0, false, USER_STACK).is_err());
        assert!(handle_page_fault(thread, KERNEL_BASE, false, USER_STACK).is_err());
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }
}
