//! Test-only coordination for the process-wide scheduler singleton.
//!
//! [`crate::sched::SCHEDULER`] is a real global: any test that calls
//! `dispatch()` or reads `current()` is making an assertion about
//! system-wide state, which would race against every other test doing the
//! same thing under cargo's default parallel test execution. Tests that
//! need deterministic control of "the current thread" acquire [`SERIAL`]
//! first so they run one at a time with respect to each other; tests that
//! only inspect specific thread ids they themselves created don't need it.

use spin::Mutex;

pub static SERIAL: Mutex<()> = Mutex::new(());
