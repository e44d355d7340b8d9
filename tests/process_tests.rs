//! End-to-end process-lifecycle scenarios (spec.md §8): create-initial
//! through exec, fork/wait, and fd/executable teardown on exit, driven
//! through the public `process::*` API against a real (in-memory) ELF
//! image and filesystem.

use std::sync::Arc;

use tarn_kernel::devices::MemoryBlockDevice;
use tarn_kernel::fs::MemFs;
use tarn_kernel::mm;
use tarn_kernel::process;
use tarn_kernel::sched::thread::{Thread, Tid};
use tarn_kernel::sched::SCHEDULER;
use tarn_kernel::test_support::SERIAL;

fn boot_idle() -> Tid {
    let mut sched = SCHEDULER.lock();
    let idle = sched.spawn(Thread::new("idle".into(), 0));
    sched.set_idle(idle);
    idle
}

fn install_backends() -> Arc<MemFs> {
    mm::VM
        .lock()
        .set_block_device(Arc::new(MemoryBlockDevice::new(4096)));
    let fs = Arc::new(MemFs::new());
    mm::VM.lock().set_filesystem(fs.clone());
    fs
}

/// Minimal but structurally valid ET_EXEC image with no program headers,
/// the same shape `process::mod`'s own exec unit test builds.
fn make_elf_image(entry: u64) -> Vec<u8> {
    let mut image = vec![0u8; 64];
    image[0..4].copy_from_slice(b"\x7FELF");
    image[4] = 2; // ELFCLASS64
    image[5] = 1; // little-endian
    image[6] = 1; // EI_VERSION
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    image[18..20].copy_from_slice(&0x3Eu16.to_le_bytes()); // e_machine = EM_X86_64
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..32].copy_from_slice(&entry.to_le_bytes());
    image[32..40].copy_from_slice(&0u64.to_le_bytes()); // e_phoff
    image[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
    image[56..58].copy_from_slice(&0u16.to_le_bytes()); // e_phnum = 0
    image
}

#[test]
fn create_initial_then_run_initial_loads_the_named_program() {
    let _serial = SERIAL.lock();
    let fs = install_backends();
    fs.put("/echo", &make_elf_image(0x4000_0123));
    let idle = boot_idle();

    let tid = process::create_initial("echo a b c");
    process::run_initial(tid);

    let sched = SCHEDULER.lock();
    let t = sched.thread(tid).expect("successful exec leaves the thread alive");
    assert_eq!(t.interrupt_frame.rip, 0x4000_0123);
    assert_eq!(t.interrupt_frame.rdi, 3, "argc");
    drop(sched);

    SCHEDULER.lock().destroy_thread(tid);
    SCHEDULER.lock().destroy_thread(idle);
}

#[test]
fn run_initial_of_a_missing_program_exits_with_status_negative_one() {
    let _serial = SERIAL.lock();
    install_backends();
    let idle = boot_idle();

    let tid = process::create_initial("nonexistent");
    process::run_initial(tid);

    let sched = SCHEDULER.lock();
    let t = sched.thread(tid).unwrap();
    assert_eq!(t.exit_status, -1);
    drop(sched);

    SCHEDULER.lock().destroy_thread(tid);
    SCHEDULER.lock().destroy_thread(idle);
}

#[test]
fn fork_duplicates_fds_and_the_childs_writes_do_not_reach_the_parents_handle() {
    let _serial = SERIAL.lock();
    let fs = install_backends();
    fs.create("/shared", 0);
    let idle = boot_idle();

    let parent = SCHEDULER.lock().spawn(Thread::new("parent".into(), 31));
    SCHEDULER.lock().thread_mut(parent).unwrap().spt =
        Some(mm::spt::SupplementalPageTable::new());
    SCHEDULER.lock().unblock(parent);

    let handle = mm::VM.lock().filesystem().open("/shared").unwrap();
    let parent_fd = {
        let mut sched = SCHEDULER.lock();
        sched.thread_mut(parent).unwrap().fd_table.insert(handle).unwrap()
    };

    let child_raw = process::fork(parent, "child");
    assert!(child_raw >= 0);
    let child = Tid(child_raw as u64);

    // Same fd number refers to an independent handle with its own cursor
    // (spec.md §4.2: duplicated descriptors "share nothing except initial
    // content").
    {
        let sched = SCHEDULER.lock();
        let child_handle = sched.thread(child).unwrap().fd_table.get(parent_fd).unwrap().clone();
        let parent_handle = sched.thread(parent).unwrap().fd_table.get(parent_fd).unwrap().clone();
        drop(sched);
        child_handle.write(b"from child");
        assert_eq!(parent_handle.tell(), 0, "parent's cursor is untouched by the child's write");
    }

    process::exit(child, 0);
    let status = process::wait(parent, child);
    assert_eq!(status, 0);

    let mut sched = SCHEDULER.lock();
    sched.destroy_thread(parent);
    sched.destroy_thread(idle);
}

#[test]
fn exit_closes_fds_and_reenables_writes_to_its_executable() {
    let _serial = SERIAL.lock();
    let fs = install_backends();
    fs.put("/prog", &make_elf_image(0x4000_0000));
    let idle = boot_idle();

    let tid = process::create_initial("prog");
    process::run_initial(tid);
    {
        let sched = SCHEDULER.lock();
        let exe = sched.thread(tid).unwrap().executable.clone().unwrap();
        drop(sched);
        // The running executable denies writes while the process is alive.
        assert_eq!(exe.write(b"x"), 0);
    }

    process::exit(tid, 42);
    let reopened = mm::VM.lock().filesystem().open("/prog").unwrap();
    assert_eq!(reopened.write(b"x"), 1, "exit must re-enable writes to its executable");

    SCHEDULER.lock().destroy_thread(tid);
    SCHEDULER.lock().destroy_thread(idle);
}

#[test]
fn waiting_on_an_already_reaped_child_fails() {
    let _serial = SERIAL.lock();
    install_backends();
    let idle = boot_idle();

    let parent = SCHEDULER.lock().spawn(Thread::new("parent".into(), 31));
    SCHEDULER.lock().unblock(parent);
    let child = SCHEDULER.lock().spawn(Thread::new("child".into(), 31));
    SCHEDULER.lock().thread_mut(child).unwrap().parent = Some(parent);
    SCHEDULER.lock().thread_mut(parent).unwrap().children.push(child);
    SCHEDULER.lock().unblock(child);

    process::exit(child, 9);
    assert_eq!(process::wait(parent, child), 9);
    assert_eq!(process::wait(parent, child), -1);

    SCHEDULER.lock().destroy_thread(parent);
    SCHEDULER.lock().destroy_thread(idle);
}
