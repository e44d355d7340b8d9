//! System-call dispatcher (spec.md §4.4).
//!
//! The trap entry stub that actually gets here from a `syscall`
//! instruction is interrupt-controller glue and out of scope (spec.md
//! §1); this module starts from the already-saved [`InterruptFrame`] on
//! the calling thread and ends by writing a return value back into it
//! (or, for `halt`/`exit`/a successful `exec`, not returning to the old
//! frame at all). Grounded on the teacher's trap-frame-driven syscall
//! dispatch (`arch::x86_64::syscall::handler` switching on a frame field)
//! and on the Pintos `syscall_handler` this kernel's process/VM layers
//! were themselves modeled on: a single `match` over the syscall number,
//! each arm doing its own argument decoding and validation.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use lazy_static::lazy_static;

use crate::error::{KernelError, KernelResult};
use crate::fs::FileHandle;
use crate::mm::{self, page_round_down, KERNEL_BASE, PGSIZE};
use crate::process;
use crate::process::fdtable::{FD_STDIN, FD_STDOUT};
use crate::sched::thread::{Thread, Tid};
use crate::sched::SCHEDULER;
use crate::sync::lock::Lock;

/// Syscall numbers. spec.md §4.4's table fixes the calling convention and
/// the set of recognized calls but never assigns them numeric values;
/// this ordering follows the table top to bottom. `SYS_MMAP`/`SYS_MUNMAP`
/// are not in that table at all — §4.5 describes mmap/munmap fully as VM
/// operations but the distilled syscall table drops the user-facing
/// entry points for them. Added here as calls 14/15 rather than left
/// unreachable from user mode, since the feature they expose is
/// otherwise fully implemented and otherwise dead code.
pub const SYS_HALT: usize = 0;
pub const SYS_EXIT: usize = 1;
pub const SYS_FORK: usize = 2;
pub const SYS_EXEC: usize = 3;
pub const SYS_WAIT: usize = 4;
pub const SYS_CREATE: usize = 5;
pub const SYS_REMOVE: usize = 6;
pub const SYS_OPEN: usize = 7;
pub const SYS_FILESIZE: usize = 8;
pub const SYS_READ: usize = 9;
pub const SYS_WRITE: usize = 10;
pub const SYS_SEEK: usize = 11;
pub const SYS_TELL: usize = 12;
pub const SYS_CLOSE: usize = 13;
pub const SYS_MMAP: usize = 14;
pub const SYS_MUNMAP: usize = 15;

lazy_static! {
    /// The single global file-system mutex (spec.md §4.4 "File-system
    /// serialization"). Acquired immediately around each underlying file
    /// op and released immediately after — never held across a blocking
    /// wait or a yield back to user mode. Console I/O does not touch it.
    static ref FILESYS_LOCK: Lock = Lock::new();
}

/// Entry point called with the faulting/trapping thread's id once its
/// [`crate::arch::InterruptFrame`] has been saved. Decodes the syscall
/// number and arguments, dispatches, and writes the result back — except
/// for `halt` (never returns), `exit` (thread is now `Dying`), and a
/// successful `exec` (the frame now points at the new program; nothing
/// to write back).
pub fn dispatch(tid: Tid) {
    let frame = match SCHEDULER.lock().thread(tid) {
        Some(t) => t.interrupt_frame,
        None => return,
    };
    let number = frame.syscall_number();
    let args = frame.syscall_args();

    let result = match number {
        SYS_HALT => crate::arch::power_off(),
        SYS_EXIT => {
            process::exit(tid, args[0] as i32);
            return;
        }
        SYS_FORK => sys_fork(tid, args),
        SYS_EXEC => {
            sys_exec(tid, args);
            return;
        }
        SYS_WAIT => sys_wait(tid, args),
        SYS_CREATE => sys_create(tid, args),
        SYS_REMOVE => sys_remove(tid, args),
        SYS_OPEN => sys_open(tid, args),
        SYS_FILESIZE => sys_filesize(tid, args),
        SYS_READ => sys_read(tid, args),
        SYS_WRITE => sys_write(tid, args),
        SYS_SEEK => sys_seek(tid, args),
        SYS_TELL => sys_tell(tid, args),
        SYS_CLOSE => {
            sys_close(tid, args);
            0
        }
        SYS_MMAP => sys_mmap(tid, args),
        SYS_MUNMAP => {
            sys_munmap(tid, args);
            0
        }
        _ => {
            // Unrecognized syscall number is a bad argument, not a
            // kernel invariant violation (spec.md §7 kind 1): kill the
            // caller rather than panic. Every arm above either returns
            // to user mode with a value in rax or diverges explicitly;
            // none fall through into the thread-exit path by accident
            // (spec.md §9's first open question, resolved this way).
            process::exit(tid, -1);
            return;
        }
    };

    if let Some(t) = SCHEDULER.lock().thread_mut(tid) {
        t.interrupt_frame.set_return_value(result);
    }
}

/// Run `body` with `tid`'s [`Thread`] taken out of the scheduler table for
/// the duration, then put it back. Needed whenever `body` might fault in
/// a page (mmap, user-buffer copies): [`mm::fault::claim_frame`] locks
/// [`SCHEDULER`] itself, and that mutex is not reentrant (same rule
/// [`process::exec`] follows for the ELF loader). Returns `None` if the
/// thread has vanished (e.g. exited concurrently with this syscall, which
/// cannot happen in this single-threaded host model but would on real
/// hardware).
fn with_thread<R>(tid: Tid, body: impl FnOnce(&mut Thread) -> R) -> Option<R> {
    let mut thread = SCHEDULER.lock().take_thread(tid)?;
    let result = body(&mut thread);
    SCHEDULER.lock().put_thread(thread);
    Some(result)
}

fn validate_addr(addr: u64) -> KernelResult<()> {
    if addr == 0 || addr >= KERNEL_BASE {
        return Err(KernelError::BadUserPointer { addr: addr as usize });
    }
    Ok(())
}

/// Fault `addr`'s page in if it is not already present, validating it
/// along the way (spec.md §4.4 "User-pointer validation"): non-null,
/// below the kernel base, and — once present — actually writable if this
/// is a write access.
fn ensure_mapped(thread: &mut Thread, addr: u64, is_write: bool) -> KernelResult<()> {
    validate_addr(addr)?;
    let vpage = page_round_down(addr);
    if !thread.page_table.is_present(vpage) {
        let sp = thread.interrupt_frame.rsp;
        mm::fault::handle_page_fault(thread, addr, is_write, sp)?;
    } else if is_write && !thread.page_table.is_writable(vpage) {
        return Err(KernelError::BadUserPointer { addr: addr as usize });
    }
    Ok(())
}

/// Copy `len` bytes out of user memory starting at `addr`, faulting in
/// and validating every page the range touches. Endpoints are checked
/// before any copying begins (spec.md §4.4: "Buffers are validated at
/// both endpoints").
fn copy_from_user(thread: &mut Thread, addr: u64, len: usize) -> KernelResult<Vec<u8>> {
    let mut out = alloc::vec![0u8; len];
    if len == 0 {
        return Ok(out);
    }
    validate_addr(addr)?;
    validate_addr(addr + (len as u64 - 1))?;

    let (mut cur, mut remaining, mut out_off) = (addr, len, 0usize);
    while remaining > 0 {
        ensure_mapped(thread, cur, false)?;
        let vpage = page_round_down(cur);
        thread.page_table.mark_accessed(vpage);
        let frame_addr = thread
            .page_table
            .translate(vpage)
            .ok_or(KernelError::Fatal("page present but not mapped"))?;
        let frame_id = mm::fault::frame_id_from_addr(frame_addr);
        let page_off = (cur - vpage) as usize;
        let n = core::cmp::min(remaining, PGSIZE - page_off);
        {
            let mut vm = mm::VM.lock();
            let content = vm.frames.content(frame_id);
            out[out_off..out_off + n].copy_from_slice(&content[page_off..page_off + n]);
        }
        cur += n as u64;
        out_off += n;
        remaining -= n;
    }
    Ok(out)
}

/// Copy `data` into user memory starting at `addr`, faulting in and
/// validating every page touched, rejecting read-only mappings.
fn copy_to_user(thread: &mut Thread, addr: u64, data: &[u8]) -> KernelResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    validate_addr(addr)?;
    validate_addr(addr + (data.len() as u64 - 1))?;

    let (mut cur, mut remaining, mut in_off) = (addr, data.len(), 0usize);
    while remaining > 0 {
        ensure_mapped(thread, cur, true)?;
        let vpage = page_round_down(cur);
        let frame_addr = thread
            .page_table
            .translate(vpage)
            .ok_or(KernelError::Fatal("page present but not mapped"))?;
        let frame_id = mm::fault::frame_id_from_addr(frame_addr);
        let page_off = (cur - vpage) as usize;
        let n = core::cmp::min(remaining, PGSIZE - page_off);
        {
            let mut vm = mm::VM.lock();
            let content = vm.frames.content_mut(frame_id);
            content[page_off..page_off + n].copy_from_slice(&data[in_off..in_off + n]);
        }
        thread.page_table.mark_dirty(vpage);
        cur += n as u64;
        in_off += n;
        remaining -= n;
    }
    Ok(())
}

/// Read a NUL-terminated string out of user memory (paths, `fork`'s
/// thread name, `exec`'s command line).
fn read_user_cstr(thread: &mut Thread, addr: u64) -> KernelResult<String> {
    const MAX_LEN: usize = 4096;
    let mut bytes = Vec::new();
    let mut cur = addr;
    loop {
        if bytes.len() >= MAX_LEN {
            return Err(KernelError::BadUserPointer { addr: addr as usize });
        }
        let b = copy_from_user(thread, cur, 1)?[0];
        if b == 0 {
            break;
        }
        bytes.push(b);
        cur += 1;
    }
    String::from_utf8(bytes).map_err(|_| KernelError::BadUserPointer { addr: addr as usize })
}

/// Every handler below follows the same shape: decode a user pointer (if
/// any), kill the caller on [`KernelError::BadUserPointer`] (spec.md §7
/// kind 1), and otherwise return the call's own success/failure value —
/// never the process's exit status (spec.md §7 kind 2/3: resource
/// exhaustion and not-found map to -1/false/null, not to killing anyone).
fn kill_on_bad_pointer<T>(tid: Tid, result: KernelResult<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(KernelError::BadUserPointer { .. }) => {
            process::exit(tid, -1);
            None
        }
        Err(_) => None,
    }
}

/// Like [`with_thread`], but for a body that can fail a user-pointer
/// check: the thread is always put back in the scheduler table *before*
/// [`kill_on_bad_pointer`] runs, since [`process::exit`] looks the thread
/// up by id and is a no-op on one that is mid-syscall and temporarily
/// absent from the table.
fn with_thread_checked<T>(
    tid: Tid,
    body: impl FnOnce(&mut Thread) -> KernelResult<T>,
) -> Option<T> {
    let result = with_thread(tid, body)?;
    kill_on_bad_pointer(tid, result)
}

fn sys_fork(tid: Tid, args: [u64; 6]) -> i64 {
    match with_thread_checked(tid, |t| read_user_cstr(t, args[0])) {
        Some(name) => process::fork(tid, &name),
        None => 0, // process already killed; return value is discarded
    }
}

fn sys_exec(tid: Tid, args: [u64; 6]) {
    if let Some(cmdline) = with_thread_checked(tid, |t| read_user_cstr(t, args[0])) {
        let _ = process::exec(tid, &cmdline);
    }
}

fn sys_wait(tid: Tid, args: [u64; 6]) -> i64 {
    process::wait(tid, Tid(args[0])) as i64
}

/// Acquire [`FILESYS_LOCK`], run `op`, release it. Held for exactly the
/// duration of the underlying call (spec.md §4.4 "File-system
/// serialization") — never across the user-pointer validation this
/// wraps around.
fn with_filesys_lock<R>(op: impl FnOnce() -> R) -> R {
    FILESYS_LOCK.acquire();
    let r = op();
    FILESYS_LOCK.release();
    r
}

fn sys_create(tid: Tid, args: [u64; 6]) -> i64 {
    let Some(path) = with_thread_checked(tid, |t| read_user_cstr(t, args[0])) else {
        return 0;
    };
    let size = args[1];
    let ok = with_filesys_lock(|| mm::VM.lock().filesystem().create(&path, size));
    ok as i64
}

fn sys_remove(tid: Tid, args: [u64; 6]) -> i64 {
    let Some(path) = with_thread_checked(tid, |t| read_user_cstr(t, args[0])) else {
        return 0;
    };
    let ok = with_filesys_lock(|| mm::VM.lock().filesystem().remove(&path));
    ok as i64
}

fn sys_open(tid: Tid, args: [u64; 6]) -> i64 {
    let Some(path) = with_thread_checked(tid, |t| read_user_cstr(t, args[0])) else {
        return -1;
    };
    let handle = with_filesys_lock(|| mm::VM.lock().filesystem().open(&path));
    let Some(handle) = handle else {
        return -1;
    };
    match with_thread(tid, |t| t.fd_table.insert(handle)) {
        Some(Ok(fd)) => fd as i64,
        _ => -1,
    }
}

fn fd_handle(tid: Tid, fd: i32) -> Option<Arc<dyn FileHandle>> {
    with_thread(tid, |t| t.fd_table.get(fd).ok().cloned()).flatten()
}

fn sys_filesize(tid: Tid, args: [u64; 6]) -> i64 {
    let fd = args[0] as i32;
    match fd_handle(tid, fd) {
        Some(h) => with_filesys_lock(|| h.length()) as i64,
        None => -1,
    }
}

fn sys_read(tid: Tid, args: [u64; 6]) -> i64 {
    let fd = args[0] as i32;
    let buf_ptr = args[1];
    let n = args[2] as usize;

    if fd == FD_STDOUT {
        return -1;
    }
    if fd == FD_STDIN {
        if n == 0 {
            return 0;
        }
        let mut kbuf = alloc::vec![0u8; n];
        let read = {
            let console = crate::devices::CONSOLE.lock();
            match console.as_ref() {
                Some(c) => c.read(&mut kbuf),
                None => 0,
            }
        };
        return match with_thread_checked(tid, |t| copy_to_user(t, buf_ptr, &kbuf[..read])) {
            Some(()) => read as i64,
            None => -1,
        };
    }

    let handle = match fd_handle(tid, fd) {
        Some(h) => h,
        None => return -1,
    };
    let mut kbuf = alloc::vec![0u8; n];
    let read = with_filesys_lock(|| handle.read(&mut kbuf));
    match with_thread_checked(tid, |t| copy_to_user(t, buf_ptr, &kbuf[..read])) {
        Some(()) => read as i64,
        None => -1,
    }
}

fn sys_write(tid: Tid, args: [u64; 6]) -> i64 {
    let fd = args[0] as i32;
    let buf_ptr = args[1];
    let n = args[2] as usize;

    if fd == FD_STDIN {
        return -1;
    }

    let Some(bytes) = with_thread_checked(tid, |t| copy_from_user(t, buf_ptr, n)) else {
        return -1;
    };

    if fd == FD_STDOUT {
        let written = {
            let console = crate::devices::CONSOLE.lock();
            match console.as_ref() {
                Some(c) => c.write(&bytes),
                None => 0,
            }
        };
        return written as i64;
    }

    let handle = match fd_handle(tid, fd) {
        Some(h) => h,
        None => return -1,
    };
    with_filesys_lock(|| handle.write(&bytes)) as i64
}

fn sys_seek(tid: Tid, args: [u64; 6]) -> i64 {
    let fd = args[0] as i32;
    let pos = args[1];
    if let Some(h) = fd_handle(tid, fd) {
        with_filesys_lock(|| h.seek(pos));
    }
    0
}

/// spec.md §9's second open question: one Pintos variant falls out of a
/// `void`-typed error path in `tell`, leaving the error sentinel
/// unspecified. Resolved here the same way `filesize`/`open` already
/// resolve "bad fd": return `-1` explicitly rather than an unspecified or
/// default value.
fn sys_tell(tid: Tid, args: [u64; 6]) -> i64 {
    let fd = args[0] as i32;
    match fd_handle(tid, fd) {
        Some(h) => with_filesys_lock(|| h.tell()) as i64,
        None => -1,
    }
}

fn sys_close(tid: Tid, args: [u64; 6]) {
    let fd = args[0] as i32;
    let _ = with_thread(tid, |t| t.fd_table.close(fd));
}

fn sys_mmap(tid: Tid, args: [u64; 6]) -> i64 {
    let addr = args[0];
    let length = args[1];
    let fd = args[2] as i32;
    let offset = args[3];

    let Some(handle) = fd_handle(tid, fd) else {
        return 0;
    };
    let result = with_thread(tid, |t| mm::mmap::mmap(t, addr, length, &handle, offset));
    match result {
        Some(Ok(())) => addr as i64,
        _ => 0,
    }
}

fn sys_munmap(tid: Tid, args: [u64; 6]) {
    let addr = args[0];
    let _ = with_thread(tid, |t| mm::mmap::munmap(t, addr));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::InterruptFrame;
    use crate::fs::{FileSystem, MemFs};
    use crate::mm::spt::SupplementalPageTable;
    use crate::sched::thread::{Thread, PRI_DEFAULT};
    use crate::test_support::SERIAL;
    use alloc::string::ToString;

    fn boot(name: &str) -> (Tid, Tid) {
        mm::VM
            .lock()
            .set_block_device(Arc::new(crate::devices::MemoryBlockDevice::new(4096)));
        let fs = Arc::new(MemFs::new());
        mm::VM.lock().set_filesystem(fs);
        crate::devices::set_console(Arc::new(crate::devices::MemoryConsole::new()));

        let mut sched = SCHEDULER.lock();
        let idle = sched.spawn(Thread::new("idle".to_string(), 0));
        sched.set_idle(idle);
        let mut t = Thread::new(name.to_string(), PRI_DEFAULT);
        t.spt = Some(SupplementalPageTable::new());
        let tid = sched.spawn(t);
        sched.unblock(tid);
        (tid, idle)
    }

    fn set_call(tid: Tid, number: usize, args: [u64; 6]) {
        let mut sched = SCHEDULER.lock();
        let t = sched.thread_mut(tid).unwrap();
        t.interrupt_frame = InterruptFrame {
            rax: number as u64,
            rdi: args[0],
            rsi: args[1],
            rdx: args[2],
            r10: args[3],
            r8: args[4],
            r9: args[5],
            ..InterruptFrame::default()
        };
    }

    fn return_value(tid: Tid) -> i64 {
        SCHEDULER.lock().thread(tid).unwrap().interrupt_frame.rax as i64
    }

    #[test]
    fn create_remove_round_trip_through_dispatch() {
        let _serial = SERIAL.lock();
        let (tid, idle) = boot("creator");

        // Fault in a stack page so `marshal_argv`-style byte writes below
        // work, then write a NUL-terminated path there.
        with_thread(tid, |t| {
            ensure_mapped(t, mm::USER_STACK - 8, true).unwrap();
            copy_to_user(t, mm::USER_STACK - 8, b"/f\0").unwrap();
        });

        set_call(tid, SYS_CREATE, [mm::USER_STACK - 8, 4, 0, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), 1);

        set_call(tid, SYS_REMOVE, [mm::USER_STACK - 8, 0, 0, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), 1);

        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn open_missing_file_returns_negative_one() {
        let _serial = SERIAL.lock();
        let (tid, idle) = boot("opener");

        with_thread(tid, |t| {
            ensure_mapped(t, mm::USER_STACK - 8, true).unwrap();
            copy_to_user(t, mm::USER_STACK - 8, b"/nope\0").unwrap();
        });

        set_call(tid, SYS_OPEN, [mm::USER_STACK - 8, 0, 0, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), -1);

        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn write_read_round_trips_through_a_real_file() {
        let _serial = SERIAL.lock();
        let (tid, idle) = boot("rw");
        mm::VM.lock().filesystem().create("/f", 0);

        with_thread(tid, |t| {
            ensure_mapped(t, mm::USER_STACK - 8, true).unwrap();
            copy_to_user(t, mm::USER_STACK - 8, b"/f\0").unwrap();
            ensure_mapped(t, mm::USER_STACK - 0x1000, true).unwrap();
            copy_to_user(t, mm::USER_STACK - 0x1000, b"hello").unwrap();
        });

        set_call(tid, SYS_OPEN, [mm::USER_STACK - 8, 0, 0, 0, 0, 0]);
        dispatch(tid);
        let fd = return_value(tid);
        assert!(fd >= 2);

        set_call(tid, SYS_WRITE, [fd as u64, mm::USER_STACK - 0x1000, 5, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), 5);

        set_call(tid, SYS_SEEK, [fd as u64, 0, 0, 0, 0, 0]);
        dispatch(tid);

        with_thread(tid, |t| {
            ensure_mapped(t, mm::USER_STACK - 0x2000, true).unwrap();
        });
        set_call(tid, SYS_READ, [fd as u64, mm::USER_STACK - 0x2000, 5, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), 5);

        let readback =
            with_thread(tid, |t| copy_from_user(t, mm::USER_STACK - 0x2000, 5).unwrap()).unwrap();
        assert_eq!(&readback, b"hello");

        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn read_fd_one_and_write_fd_zero_are_rejected() {
        let _serial = SERIAL.lock();
        let (tid, idle) = boot("bad-fd");

        set_call(tid, SYS_READ, [FD_STDOUT as u64, 0, 0, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), -1);

        set_call(tid, SYS_WRITE, [FD_STDIN as u64, 0, 0, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), -1);

        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn console_write_then_read_round_trip() {
        let _serial = SERIAL.lock();
        let (tid, idle) = boot("console");

        with_thread(tid, |t| {
            ensure_mapped(t, mm::USER_STACK - 8, true).unwrap();
            copy_to_user(t, mm::USER_STACK - 8, b"hi").unwrap();
        });
        set_call(tid, SYS_WRITE, [FD_STDOUT as u64, mm::USER_STACK - 8, 2, 0, 0, 0]);
        dispatch(tid);
        assert_eq!(return_value(tid), 2);

        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }

    #[test]
    fn bad_pointer_kills_the_calling_process() {
        let _serial = SERIAL.lock();
        let (tid, idle) = boot("killme");

        set_call(tid, SYS_CREATE, [0, 4, 0, 0, 0, 0]); // null pointer
        dispatch(tid);

        let sched = SCHEDULER.lock();
        assert_eq!(sched.thread(tid).unwrap().exit_status, -1);
        drop(sched);
        let mut sched = SCHEDULER.lock();
        sched.destroy_thread(tid);
        sched.destroy_thread(idle);
    }
}
