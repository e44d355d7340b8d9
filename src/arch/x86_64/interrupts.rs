//! Interrupt-enable state as an RAII scope (spec.md §9 "Interrupt-disable
//! as a scope").
//!
//! On bare metal this wraps `cli`/`sti`/`pushf+popf`. On host targets (used
//! by the test suite) there is no real IF flag, so a process-wide atomic
//! models it: good enough to unit-test the discipline ("disable around any
//! shared-state update not already protected by a lock") without executing
//! privileged instructions outside ring 0.

#[cfg(not(target_os = "none"))]
use core::sync::atomic::{AtomicBool, Ordering};

#[cfg(not(target_os = "none"))]
static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Are interrupts currently enabled?
pub fn are_enabled() -> bool {
    #[cfg(target_os = "none")]
    {
        x86_64::instructions::interrupts::are_enabled()
    }
    #[cfg(not(target_os = "none"))]
    {
        INTERRUPTS_ENABLED.load(Ordering::SeqCst)
    }
}

/// Disable interrupts (`cli`).
pub fn disable() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::disable();
    #[cfg(not(target_os = "none"))]
    INTERRUPTS_ENABLED.store(false, Ordering::SeqCst);
}

/// Enable interrupts (`sti`).
pub fn enable() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::enable();
    #[cfg(not(target_os = "none"))]
    INTERRUPTS_ENABLED.store(true, Ordering::SeqCst);
}

/// Atomically re-enable interrupts and halt, so a wakeup that arrives
/// between the enable and the halt is not lost (used only by the idle
/// thread, spec.md §4.1).
pub fn enable_and_halt() {
    #[cfg(target_os = "none")]
    x86_64::instructions::interrupts::enable_and_hlt();
    #[cfg(not(target_os = "none"))]
    {
        enable();
        super::halt();
    }
}

/// RAII guard that disables interrupts on construction and restores the
/// *prior* enabled/disabled state on drop — so nested guards compose
/// correctly instead of unconditionally re-enabling.
#[must_use = "dropping this immediately re-enables interrupts"]
pub struct InterruptGuard {
    was_enabled: bool,
}

impl InterruptGuard {
    pub fn new() -> Self {
        let was_enabled = are_enabled();
        disable();
        Self { was_enabled }
    }
}

impl Default for InterruptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            enable();
        }
    }
}
