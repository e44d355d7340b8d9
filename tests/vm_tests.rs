//! End-to-end virtual-memory scenarios (spec.md §8): demand-paged stack
//! growth, clock eviction under pool pressure with a swap round-trip, and
//! mmap/munmap write-back, all driven through the public `mm::*` API
//! against a real (small, to force eviction) frame pool.

use std::sync::Arc;

use tarn_kernel::devices::MemoryBlockDevice;
use tarn_kernel::fs::MemFs;
use tarn_kernel::mm::fault::{frame_id_from_addr, handle_page_fault};
use tarn_kernel::mm::spt::SupplementalPageTable;
use tarn_kernel::mm::{self, page_round_down, USER_STACK};
use tarn_kernel::sched::thread::Thread;
use tarn_kernel::sched::SCHEDULER;
use tarn_kernel::test_support::SERIAL;

fn fresh_user_thread(name: &str) -> Thread {
    let mut t = Thread::new(name.into(), 31);
    t.spt = Some(SupplementalPageTable::new());
    t
}

#[test]
fn eviction_under_pressure_round_trips_anon_content_through_swap() {
    let _serial = SERIAL.lock();
    mm::VM
        .lock()
        .set_block_device(Arc::new(MemoryBlockDevice::new(4096)));
    mm::VM.lock().reinit_frame_pool(1);

    let mut sched = SCHEDULER.lock();
    let idle = sched.spawn(Thread::new("idle".into(), 0));
    sched.set_idle(idle);
    let tid = sched.spawn(fresh_user_thread("pressured"));
    let mut thread = sched.take_thread(tid).unwrap();
    drop(sched);

    let page_a = USER_STACK - 0x1000;
    let page_b = USER_STACK - 0x2000;
    handle_page_fault(&mut thread, page_a, true, page_a).unwrap();
    {
        let frame = thread.page_table.translate(page_round_down(page_a)).unwrap();
        let id = frame_id_from_addr(frame);
        mm::VM.lock().frames.content_mut(id)[0] = 0xAB;
    }

    // A second page, with only one frame in the pool, forces the first
    // page's frame to be evicted to swap.
    handle_page_fault(&mut thread, page_b, true, page_b).unwrap();
    assert!(!thread.page_table.is_present(page_round_down(page_a)));

    // Touching it again faults it back in; its content must have survived
    // the round trip through swap.
    handle_page_fault(&mut thread, page_a, true, page_a).unwrap();
    let frame = thread.page_table.translate(page_round_down(page_a)).unwrap();
    let id = frame_id_from_addr(frame);
    assert_eq!(mm::VM.lock().frames.content(id)[0], 0xAB);

    let mut sched = SCHEDULER.lock();
    sched.put_thread(thread);
    sched.destroy_thread(tid);
    sched.destroy_thread(idle);
}

#[test]
fn mmap_fault_in_write_then_munmap_writes_back_to_the_file() {
    let _serial = SERIAL.lock();
    mm::VM
        .lock()
        .set_block_device(Arc::new(MemoryBlockDevice::new(4096)));
    let fs = MemFs::new();
    fs.put("/f", b"hello");
    let handle = fs.open("/f").unwrap();

    let mut sched = SCHEDULER.lock();
    let idle = sched.spawn(Thread::new("idle".into(), 0));
    sched.set_idle(idle);
    let tid = sched.spawn(fresh_user_thread("mapper"));
    let mut thread = sched.take_thread(tid).unwrap();
    drop(sched);

    mm::mmap::mmap(&mut thread, 0x5000, 5, &handle, 0).unwrap();
    handle_page_fault(&mut thread, 0x5000, true, 0x5000).unwrap();
    {
        let frame = thread.page_table.translate(0x5000).unwrap();
        let id = frame_id_from_addr(frame);
        mm::VM.lock().frames.content_mut(id)[..5].copy_from_slice(b"WORLD");
    }
    thread.page_table.mark_dirty(0x5000);

    mm::mmap::munmap(&mut thread, 0x5000).unwrap();

    let reread = fs.open("/f").unwrap();
    let mut buf = [0u8; 5];
    reread.read(&mut buf);
    assert_eq!(&buf, b"WORLD");

    let mut sched = SCHEDULER.lock();
    sched.put_thread(thread);
    sched.destroy_thread(tid);
    sched.destroy_thread(idle);
}

#[test]
fn fault_beyond_the_stack_growth_limit_is_rejected_end_to_end() {
    let _serial = SERIAL.lock();
    mm::VM
        .lock()
        .set_block_device(Arc::new(MemoryBlockDevice::new(4096)));

    let mut sched = SCHEDULER.lock();
    let idle = sched.spawn(Thread::new("idle".into(), 0));
    sched.set_idle(idle);
    let tid = sched.spawn(fresh_user_thread("far"));
    let thread = sched.thread_mut(tid).unwrap();

    let far_below = USER_STACK - mm::STACK_GROWTH_LIMIT - mm::PGSIZE as u64;
    assert!(handle_page_fault(thread, far_below, true, USER_STACK - 4).is_err());

    sched.destroy_thread(tid);
    sched.destroy_thread(idle);
}
