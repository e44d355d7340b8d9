//! Bare-metal entry point.
//!
//! Grounded on the teacher's `kernel/src/main.rs` `_start` trampoline: a
//! fixed sequence of module `init()` calls followed by a run loop. The
//! boot loader that gets a CPU into 64-bit mode and calls `_start`, and
//! the interrupt controller wiring that turns a hardware timer tick or a
//! `syscall` instruction into a call into [`tarn_kernel::timer::on_tick`]
//! / [`tarn_kernel::syscall::dispatch`], are both out of scope (spec.md
//! §1) — this file is everything above that boundary.
//!
//! No block/console driver exists yet either (same out-of-scope
//! boundary), so this boots against the in-memory [`devices::MemoryBlockDevice`]
//! / [`devices::MemoryConsole`] and an empty [`fs::MemFs`] rather than
//! real hardware — a ramdisk stand-in, not a claim that this runs a real
//! disk. Swapping in real drivers only requires calling
//! `mm::VM.lock().set_block_device(...)`/`set_filesystem(...)` and
//! `devices::set_console(...)` with different implementations of the same
//! traits.

#![no_std]
#![no_main]

#[macro_use]
extern crate tarn_kernel;
extern crate alloc;

use alloc::sync::Arc;
use core::panic::PanicInfo;

use tarn_kernel::{config::KernelConfig, devices, fs::MemFs, mm, process, sched, timer};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("[KERNEL PANIC] {info}");
    loop {
        tarn_kernel::arch::halt();
    }
}

/// The kernel command line a real boot loader would hand `_start`
/// (spec.md §6 "CLI surface"). Reading it out of whatever the boot
/// protocol puts it in (multiboot2 info, a UEFI argument, ...) is boot
/// glue, out of scope; this is the fixed string used until that glue
/// exists.
const BOOT_CMDLINE: &str = "-o mlfqs";

/// The first user program (spec.md §4.2 "Create-initial"). A real kernel
/// reads this out of the same boot configuration as `BOOT_CMDLINE`; fixed
/// here until that glue exists.
const INIT_PROGRAM: &str = "shell";

/// Sectors on the swap device backing this boot's default-sized frame and
/// swap-slot pools (`mm::DEFAULT_SWAP_PAGES` pages, `SECTORS_PER_PAGE`
/// sectors each). Real hardware would size this from detected disk
/// geometry instead (out of scope, spec.md §1).
const SWAP_DEVICE_SECTORS: usize = 4096;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    tarn_kernel::log_sink::init(log::LevelFilter::Info);
    println!("tarn-kernel v{}", env!("CARGO_PKG_VERSION"));

    let config = KernelConfig::from_cmdline(BOOT_CMDLINE);
    let effective_hz = timer::init(&config);
    println!("timer: {effective_hz} Hz, mlfqs={}", config.mlfqs);

    sched::init(&config);

    {
        let mut vm = mm::VM.lock();
        vm.set_block_device(Arc::new(devices::MemoryBlockDevice::new(
            SWAP_DEVICE_SECTORS,
        )));
        vm.set_filesystem(Arc::new(MemFs::new()));
    }
    devices::set_console(Arc::new(devices::MemoryConsole::new()));

    let init_tid = process::create_initial(INIT_PROGRAM);
    process::run_initial(init_tid);

    // The scheduler's actual dispatch loop runs off interrupts (timer
    // tick, syscall trap) that the interrupt controller glue delivers;
    // that glue is out of scope (spec.md §1), so this just parks the CPU
    // for whatever the first interrupt is once that glue exists.
    loop {
        tarn_kernel::arch::halt();
    }
}
