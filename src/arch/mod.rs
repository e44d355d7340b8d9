//! Architecture glue.
//!
//! Only x86_64 is implemented — the scheduler/VM/process cores above this
//! layer are architecture-agnostic and only depend on the narrow surface
//! re-exported here: an interrupt frame shape, an interrupt-disable scope
//! guard, and a CPU context swap primitive. Programming the interrupt
//! controller itself is out of scope (spec.md §1).

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::{
    context::CpuContext,
    interrupt_frame::InterruptFrame,
    interrupts::{are_enabled, disable, enable, InterruptGuard},
};

/// Halt the CPU until the next interrupt. Used by the idle thread (spec.md §4.1).
pub fn halt() {
    #[cfg(target_arch = "x86_64")]
    x86_64::halt();
    #[cfg(not(target_arch = "x86_64"))]
    loop {}
}

/// Power off the machine (`SYS_HALT` syscall, spec.md §4.4). Never returns
/// on bare metal.
pub fn power_off() -> ! {
    #[cfg(target_arch = "x86_64")]
    x86_64::power_off();
    #[cfg(not(target_arch = "x86_64"))]
    loop {}
}
