//! SPT copy for fork (spec.md §4.5 "SPT copy (fork)", resolved per
//! SPEC_FULL.md §4.5.1).
//!
//! spec.md's literal text has file-backed pages "eagerly mapped to the
//! parent's frame" on fork, explicitly flagging that sharing as an open
//! question because it lets a child's write-back race the parent's.
//! SPEC_FULL.md §4.5.1 resolves that question: file-backed resident pages
//! are copied eagerly into a fresh frame, exactly like anon pages, so a
//! forked child never aliases a frame with its parent.

extern crate alloc;

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::sched::scheduler::Scheduler;
use crate::sched::thread::Tid;

use super::{
    fault::{claim_frame_locked, frame_addr},
    file_backed::FileBackedPage,
    frame::FrameId,
    spt::{Initializer, PageKind, SptEntry},
    swap::{self, AnonPage},
    PGSIZE, VmContext,
};

/// Everything needed to build a child's copy of one parent SPT entry,
/// captured while only a shared borrow of the parent thread is held.
enum CopyPlan {
    Uninit {
        vpage: u64,
        writable: bool,
        init: Initializer,
        mmap_page_count: Option<u32>,
    },
    AnonResident {
        vpage: u64,
        writable: bool,
        frame_id: FrameId,
        mmap_page_count: Option<u32>,
    },
    AnonSwapped {
        vpage: u64,
        writable: bool,
        slot: usize,
        mmap_page_count: Option<u32>,
    },
    FileResident {
        vpage: u64,
        writable: bool,
        page: FileBackedPage,
        frame_id: FrameId,
        mmap_page_count: Option<u32>,
    },
    FileNonResident {
        vpage: u64,
        writable: bool,
        page: FileBackedPage,
        mmap_page_count: Option<u32>,
    },
}

/// Duplicate `parent_tid`'s supplemental page table into `child_tid`'s
/// (already-empty) one (spec.md §4.2 Fork, §4.5 SPT copy). Caller already
/// holds both [`super::SCHEDULER`] and [`VM`](super::VM) for the whole
/// call — a victim frame selected mid-copy must never be one the copy
/// itself just installed for the child, which requires the child to be
/// resolvable in the scheduler's thread table throughout (unlike
/// [`crate::sched::scheduler::Scheduler::take_thread`], which would
/// remove it).
pub fn copy_address_space(
    sched: &mut Scheduler,
    vm: &mut VmContext,
    parent_tid: Tid,
    child_tid: Tid,
) -> KernelResult<()> {
    let plans: Vec<CopyPlan> = {
        let parent = sched
            .thread(parent_tid)
            .ok_or(KernelError::Fatal("fork: parent thread vanished mid-copy"))?;
        let spt = parent
            .spt
            .as_ref()
            .ok_or(KernelError::Fatal("fork: parent has no SPT"))?;
        spt.iter()
            .map(|entry| match &entry.kind {
                PageKind::Uninit(u) => CopyPlan::Uninit {
                    vpage: entry.vpage,
                    writable: entry.writable,
                    init: u.init.clone(),
                    mmap_page_count: entry.mmap_page_count,
                },
                PageKind::Anon(a) => match entry.frame {
                    Some(frame_id) => CopyPlan::AnonResident {
                        vpage: entry.vpage,
                        writable: entry.writable,
                        frame_id,
                        mmap_page_count: entry.mmap_page_count,
                    },
                    None => CopyPlan::AnonSwapped {
                        vpage: entry.vpage,
                        writable: entry.writable,
                        slot: a
                            .slot
                            .expect("non-resident anon page must hold a swap slot"),
                        mmap_page_count: entry.mmap_page_count,
                    },
                },
                PageKind::File(f) => match entry.frame {
                    Some(frame_id) => CopyPlan::FileResident {
                        vpage: entry.vpage,
                        writable: entry.writable,
                        page: f.reopened(),
                        frame_id,
                        mmap_page_count: entry.mmap_page_count,
                    },
                    None => CopyPlan::FileNonResident {
                        vpage: entry.vpage,
                        writable: entry.writable,
                        page: f.reopened(),
                        mmap_page_count: entry.mmap_page_count,
                    },
                },
            })
            .collect()
    };

    for plan in plans {
        let entry = build_child_entry(sched, vm, child_tid, plan)?;
        if let Some(frame_id) = entry.frame {
            let child = sched
                .thread_mut(child_tid)
                .ok_or(KernelError::Fatal("fork: child thread vanished mid-copy"))?;
            child
                .page_table
                .map(entry.vpage, frame_addr(frame_id), entry.writable);
        }
        let child = sched
            .thread_mut(child_tid)
            .ok_or(KernelError::Fatal("fork: child thread vanished mid-copy"))?;
        let child_spt = child
            .spt
            .as_mut()
            .ok_or(KernelError::Fatal("fork: child has no SPT"))?;
        child_spt
            .insert(entry)
            .map_err(|_| KernelError::Fatal("fork: duplicate vpage while copying SPT"))?;
    }

    Ok(())
}

fn build_child_entry(
    sched: &mut Scheduler,
    vm: &mut VmContext,
    child_tid: Tid,
    plan: CopyPlan,
) -> KernelResult<SptEntry> {
    match plan {
        CopyPlan::Uninit {
            vpage,
            writable,
            init,
            mmap_page_count,
        } => {
            let mut entry = SptEntry::new_uninit(vpage, writable, init);
            entry.mmap_page_count = mmap_page_count;
            Ok(entry)
        }
        CopyPlan::AnonResident {
            vpage,
            writable,
            frame_id,
            mmap_page_count,
        } => {
            let content = *vm.frames.content(frame_id);
            let new_frame = claim_frame_locked(sched, vm, child_tid, vpage)?;
            *vm.frames.content_mut(new_frame) = content;
            let mut entry = SptEntry::new_anon_stack(vpage);
            entry.writable = writable;
            entry.frame = Some(new_frame);
            entry.mmap_page_count = mmap_page_count;
            Ok(entry)
        }
        CopyPlan::AnonSwapped {
            vpage,
            writable,
            slot,
            mmap_page_count,
        } => {
            let dev = vm.block_device();
            let mut content = [0u8; PGSIZE];
            swap::read_slot(&*dev, slot, &mut content);
            let mut new_anon = AnonPage::default();
            swap::swap_out(&*dev, &mut vm.swap, &mut new_anon, &content)?;
            let mut entry = SptEntry::new_anon_stack(vpage);
            entry.writable = writable;
            entry.kind = PageKind::Anon(new_anon);
            entry.mmap_page_count = mmap_page_count;
            Ok(entry)
        }
        CopyPlan::FileResident {
            vpage,
            writable,
            page,
            frame_id,
            mmap_page_count,
        } => {
            let content = *vm.frames.content(frame_id);
            let new_frame = claim_frame_locked(sched, vm, child_tid, vpage)?;
            *vm.frames.content_mut(new_frame) = content;
            let mut entry = SptEntry::new_anon_stack(vpage);
            entry.writable = writable;
            entry.kind = PageKind::File(page);
            entry.frame = Some(new_frame);
            entry.mmap_page_count = mmap_page_count;
            Ok(entry)
        }
        CopyPlan::FileNonResident {
            vpage,
            writable,
            page,
            mmap_page_count,
        } => {
            let mut entry = SptEntry::new_anon_stack(vpage);
            entry.writable = writable;
            entry.kind = PageKind::File(page);
            entry.mmap_page_count = mmap_page_count;
            Ok(entry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFs};
    use crate::mm::spt::SupplementalPageTable;
    use crate::mm::VM;
    use crate::sched::thread::Thread;
    use crate::sched::SCHEDULER;
    use crate::test_support::SERIAL;
    use alloc::string::String;

    fn fresh_user_thread(name: &str) -> Thread {
        let mut t = Thread::new(String::from(name), 31);
        t.spt = Some(SupplementalPageTable::new());
        t
    }

    #[test]
    fn resident_anon_page_is_copied_into_a_fresh_frame() {
        let _serial = SERIAL.lock();
        VM.lock().set_block_device(alloc::sync::Arc::new(
            crate::devices::MemoryBlockDevice::new(4096),
        ));
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let parent_tid = sched.spawn(fresh_user_thread("parent"));
        let child_tid = sched.spawn(fresh_user_thread("child"));

        let frame_id = {
            let mut vm = VM.lock();
            let id = claim_frame_locked(&mut sched, &mut vm, parent_tid, 0x1000).unwrap();
            vm.frames.content_mut(id)[0] = 0x77;
            id
        };
        let parent = sched.thread_mut(parent_tid).unwrap();
        parent.page_table.map(0x1000, frame_addr(frame_id), true);
        parent
            .spt
            .as_mut()
            .unwrap()
            .insert({
                let mut e = SptEntry::new_anon_stack(0x1000);
                e.frame = Some(frame_id);
                e
            })
            .unwrap();

        {
            let mut vm = VM.lock();
            copy_address_space(&mut sched, &mut vm, parent_tid, child_tid).unwrap();
        }

        let child = sched.thread_mut(child_tid).unwrap();
        assert!(child.spt.as_ref().unwrap().contains(0x1000));
        assert!(child.page_table.is_present(0x1000));
        let child_frame = child.spt.as_ref().unwrap().lookup(0x1000).unwrap().frame.unwrap();
        assert_ne!(child_frame, frame_id, "child must not alias the parent's frame");
        assert_eq!(VM.lock().frames.content(child_frame)[0], 0x77);

        sched.destroy_thread(parent_tid);
        sched.destroy_thread(child_tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn resident_file_backed_page_is_copied_eagerly_not_shared() {
        let _serial = SERIAL.lock();
        VM.lock().set_block_device(alloc::sync::Arc::new(
            crate::devices::MemoryBlockDevice::new(4096),
        ));
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let parent_tid = sched.spawn(fresh_user_thread("parent"));
        let child_tid = sched.spawn(fresh_user_thread("child"));

        let fs = MemFs::new();
        fs.put("/f", b"hello");
        let handle = fs.open("/f").unwrap();
        let page = FileBackedPage::new(handle, 0, 5, 0);

        let frame_id = {
            let mut vm = VM.lock();
            let id = claim_frame_locked(&mut sched, &mut vm, parent_tid, 0x3000).unwrap();
            vm.frames.content_mut(id)[..5].copy_from_slice(b"hello");
            id
        };
        let parent = sched.thread_mut(parent_tid).unwrap();
        parent.page_table.map(0x3000, frame_addr(frame_id), true);
        parent
            .spt
            .as_mut()
            .unwrap()
            .insert({
                let mut e = SptEntry::new_anon_stack(0x3000);
                e.kind = PageKind::File(page);
                e.frame = Some(frame_id);
                e
            })
            .unwrap();

        {
            let mut vm = VM.lock();
            copy_address_space(&mut sched, &mut vm, parent_tid, child_tid).unwrap();
        }

        let child = sched.thread_mut(child_tid).unwrap();
        let child_frame = child.spt.as_ref().unwrap().lookup(0x3000).unwrap().frame.unwrap();
        assert_ne!(child_frame, frame_id);
        assert_eq!(&VM.lock().frames.content(child_frame)[..5], b"hello");

        sched.destroy_thread(parent_tid);
        sched.destroy_thread(child_tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn uninit_page_shares_initializer_by_value() {
        let _serial = SERIAL.lock();
        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new(String::from("idle"), 0));
        sched.set_idle(idle);
        let parent_tid = sched.spawn(fresh_user_thread("parent"));
        let child_tid = sched.spawn(fresh_user_thread("child"));

        let init: Initializer = alloc::sync::Arc::new(|| PageKind::Anon(AnonPage::default()));
        let parent = sched.thread_mut(parent_tid).unwrap();
        parent
            .spt
            .as_mut()
            .unwrap()
            .insert(SptEntry::new_uninit(0x5000, true, init))
            .unwrap();

        {
            let mut vm = VM.lock();
            copy_address_space(&mut sched, &mut vm, parent_tid, child_tid).unwrap();
        }

        let child = sched.thread_mut(child_tid).unwrap();
        let entry = child.spt.as_ref().unwrap().lookup(0x5000).unwrap();
        assert!(matches!(entry.kind, PageKind::Uninit(_)));
        assert!(entry.frame.is_none());

        sched.destroy_thread(parent_tid);
        sched.destroy_thread(child_tid);
        sched.destroy_thread(idle);
    }
}
