//! Tarn kernel library
//!
//! Exposes the four cores described in the design docs — scheduler, process
//! lifecycle, system calls, and virtual memory — as a `no_std` library so
//! they can be linked into the bare-metal binary (`src/main.rs`) and also
//! exercised directly by the host-side test suite under `tests/`.

#![no_std]
#![cfg_attr(target_os = "none", no_main)]
#![allow(clippy::needless_lifetimes)]

#[cfg(feature = "alloc")]
extern crate alloc;

// Bare-metal targets use the kernel's own heap; host targets (where the test
// suite runs) fall back to the system allocator so `Vec`/`BTreeMap`/`Box` in
// test code behave normally. Mirrors the split the teacher's boot glue uses
// to let `cargo test` exercise kernel logic without a custom target spec.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

#[macro_use]
pub mod print;

pub mod arch;
pub mod config;
pub mod devices;
pub mod elf;
pub mod error;
pub mod fs;
pub mod log_sink;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;

#[doc(hidden)]
pub mod test_support;

pub use error::KernelError;
