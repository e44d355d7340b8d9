//! Timer tick source (spec.md §2 "Timer tick source", §6 "Timer").
//!
//! Programming the 8254 PIT itself is out of scope (spec.md §1); this
//! module is the stable surface the interrupt controller glue calls into
//! once per hardware tick, and the monotonic counter callers read back.
//! Grounded on the teacher's `arch::x86_64::pit`/timer-interrupt-handler
//! split: a narrow hardware-programming stub plus a tick handler that
//! only touches kernel state through [`crate::sched`].

extern crate alloc;

use crate::config::{KernelConfig, TIMER_FREQ_RANGE};

/// Validate a requested timer frequency against spec.md §6's `[19,1000]`
/// Hz range, clamping to the nearest bound if out of range.
pub fn clamp_frequency(hz: u32) -> u32 {
    hz.clamp(*TIMER_FREQ_RANGE.start(), *TIMER_FREQ_RANGE.end())
}

/// Program the hardware timer to `config.timer_freq` and return the
/// effective frequency actually programmed. The PIT divisor arithmetic
/// itself is boot glue (spec.md §1 "8254 PIT programming" is out of
/// scope) — this just enforces the frequency range the rest of the
/// kernel assumes holds.
pub fn init(config: &KernelConfig) -> u32 {
    clamp_frequency(config.timer_freq)
}

/// Called by the timer interrupt handler on every tick, with interrupts
/// already disabled by the trap entry stub (spec.md §2: "invokes
/// scheduler hooks on each tick"). Returns whether the interrupt-return
/// path should yield to a higher-priority thread.
pub fn on_tick() -> bool {
    crate::sched::on_tick()
}

/// Current value of the monotonic tick counter.
pub fn ticks() -> u64 {
    crate::sched::SCHEDULER.lock().tick_count()
}
