//! mmap / munmap (spec.md §4.5 "mmap", "munmap").

extern crate alloc;

use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::fs::FileHandle;
use crate::sched::thread::Thread;

use super::{
    file_backed::FileBackedPage, is_page_aligned, page_round_down, spt::SptEntry, PGSIZE,
};

/// Map `length` bytes of `handle` (already positioned irrelevant — offset
/// is an explicit argument) into `thread` starting at `addr` (spec.md
/// §4.5 mmap).
///
/// Reopens the file so the mapping owns an independent handle, computes
/// `read_bytes = min(length, file_length - offset)` and the trailing
/// zero-fill count, then registers one file-backed uninit SPT entry per
/// page; the first page records the total page count so munmap can
/// unwind the whole run. Fails without mapping anything if `addr`/`offset`
/// are unaligned, `addr` is null, `length` is 0, or any page in the
/// range is already occupied.
pub fn mmap(
    thread: &mut Thread,
    addr: u64,
    length: u64,
    handle: &Arc<dyn FileHandle>,
    offset: u64,
) -> KernelResult<()> {
    if addr == 0 || length == 0 || !is_page_aligned(addr) || !is_page_aligned(offset) {
        return Err(KernelError::BadMmapArgs);
    }

    let file_length = handle.length();
    if offset >= file_length {
        return Err(KernelError::BadMmapArgs);
    }

    let page_count = ((length + PGSIZE as u64 - 1) / PGSIZE as u64) as u32;
    let spt = thread
        .spt
        .as_mut()
        .ok_or(KernelError::Fatal("mmap on a thread with no SPT"))?;

    for i in 0..page_count {
        if spt.contains(addr + (i as u64) * PGSIZE as u64) {
            return Err(KernelError::DuplicateMapping);
        }
    }

    let reopened = handle.reopen();
    // spec.md §8: a mapping reads `min(length, file_length)` worth of
    // content from `offset`, zero-padding the rest of the last page.
    // Bounding only by what's left in the file (and not also by the
    // mapping's own `length`) would let a mapping shorter than the
    // remaining file read past its own logical end.
    let remaining = core::cmp::min(length, file_length - offset);

    for i in 0..page_count {
        let vpage = addr + (i as u64) * PGSIZE as u64;
        let page_offset = offset + (i as u64) * PGSIZE as u64;
        let consumed = (i as u64) * PGSIZE as u64;
        let read_bytes = if consumed >= remaining {
            0
        } else {
            core::cmp::min(PGSIZE as u64, remaining - consumed) as u32
        };
        let zero_bytes = PGSIZE as u32 - read_bytes;
        let page_handle = reopened.reopen();
        let init_handle = page_handle.clone();

        let init: super::spt::Initializer = Arc::new(move || {
            super::spt::PageKind::File(FileBackedPage::new(
                init_handle.clone(),
                page_offset,
                read_bytes,
                zero_bytes,
            ))
        });

        let mut entry = SptEntry::new_uninit(vpage, true, init);
        if i == 0 {
            entry.mmap_page_count = Some(page_count);
        }
        spt.insert(entry)
            .expect("mmap duplicate check above should have caught this");
    }

    Ok(())
}

/// Unmap the mmap region starting at `addr` (spec.md §4.5 munmap):
/// destroy `mmap_page_count` successive SPT entries, writing back dirty
/// file-backed content and removing the hardware mapping for any that
/// were faulted in.
pub fn munmap(thread: &mut Thread, addr: u64) -> KernelResult<()> {
    let vpage = page_round_down(addr);
    let spt = thread
        .spt
        .as_mut()
        .ok_or(KernelError::Fatal("munmap on a thread with no SPT"))?;
    let page_count = spt
        .lookup(vpage)
        .and_then(|e| e.mmap_page_count)
        .ok_or(KernelError::BadMmapArgs)?;

    for i in 0..page_count {
        let page_vpage = vpage + (i as u64) * PGSIZE as u64;
        let Some(entry) = spt.remove(page_vpage) else {
            continue;
        };
        if let Some(frame_id) = entry.frame {
            let dirty = thread.page_table.is_dirty(page_vpage);
            let mut vm = super::VM.lock();
            let content = *vm.frames.content(frame_id);
            if let super::spt::PageKind::File(f) = &entry.kind {
                super::file_backed::write_back_if_dirty(f, &content, dirty);
            }
            vm.frames.clear_owner(frame_id);
            thread.page_table.unmap(page_vpage);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFs};
    use crate::mm::spt::SupplementalPageTable;
    use crate::mm::fault::{claim_frame, frame_addr};
    use crate::sched::thread::Thread;
    use alloc::string::String;

    fn fresh_user_thread(name: &str) -> Thread {
        let mut t = Thread::new(String::from(name), 31);
        t.spt = Some(SupplementalPageTable::new());
        t
    }

    #[test]
    fn mmap_rejects_unaligned_address() {
        let fs = MemFs::new();
        fs.put("/f", b"hello world");
        let handle = fs.open("/f").unwrap();
        let mut t = fresh_user_thread("m");
        assert_eq!(
            mmap(&mut t, 1, 11, &handle, 0),
            Err(KernelError::BadMmapArgs)
        );
    }

    #[test]
    fn mmap_registers_one_entry_per_page_and_records_count_on_first() {
        let fs = MemFs::new();
        fs.put("/f", &[b'x'; 5000]);
        let handle = fs.open("/f").unwrap();
        let mut t = fresh_user_thread("m");
        mmap(&mut t, 0x1000, 5000, &handle, 0).unwrap();

        let spt = t.spt.as_ref().unwrap();
        assert_eq!(spt.len(), 2);
        assert_eq!(spt.lookup(0x1000).unwrap().mmap_page_count, Some(2));
        assert_eq!(spt.lookup(0x2000).unwrap().mmap_page_count, None);
    }

    #[test]
    fn mmap_rejects_overlap_with_existing_entry() {
        let fs = MemFs::new();
        fs.put("/f", b"hello world");
        let handle = fs.open("/f").unwrap();
        let mut t = fresh_user_thread("m");
        t.spt
            .as_mut()
            .unwrap()
            .insert(SptEntry::new_anon_stack(0x1000))
            .unwrap();
        assert_eq!(
            mmap(&mut t, 0x1000, 11, &handle, 0),
            Err(KernelError::DuplicateMapping)
        );
    }

    #[test]
    fn munmap_without_mapping_errors() {
        let mut t = fresh_user_thread("m");
        assert_eq!(munmap(&mut t, 0x4000), Err(KernelError::BadMmapArgs));
    }

    #[test]
    fn munmap_writes_back_dirty_faulted_pages() {
        let _serial = crate::test_support::SERIAL.lock();
        crate::mm::VM.lock().set_block_device(Arc::new(
            crate::devices::MemoryBlockDevice::new(4096),
        ));
        let fs = MemFs::new();
        fs.put("/f", b"hello");
        let handle = fs.open("/f").unwrap();
        let mut t = fresh_user_thread("m");
        mmap(&mut t, 0x3000, 5, &handle, 0).unwrap();

        let frame_id = claim_frame(t.id, 0x3000).unwrap();
        {
            let mut vm = crate::mm::VM.lock();
            let content = vm.frames.content_mut(frame_id);
            content[..5].copy_from_slice(b"WORLD");
        }
        t.spt.as_mut().unwrap().lookup_mut(0x3000).unwrap().frame = Some(frame_id);
        t.page_table.map(0x3000, frame_addr(frame_id), true);
        t.page_table.mark_dirty(0x3000);

        munmap(&mut t, 0x3000).unwrap();

        let reread = fs.open("/f").unwrap();
        let mut buf = [0u8; 5];
        reread.read(&mut buf);
        assert_eq!(&buf, b"WORLD");
    }
}
