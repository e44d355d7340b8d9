//! Minimal `log`-crate backend.
//!
//! Byte output is delegated to whatever [`Writer`] the boot glue installs
//! (serial port, VGA text mode, or — for the host test suite — a buffer).
//! Programming the actual device is out of scope for this kernel (see
//! spec.md §1); this module only owns the formatting and the `log::Log`
//! plumbing.

use core::fmt::{self, Write};

use spin::Mutex;

/// A byte sink a concrete console driver implements.
pub trait Writer: Send {
    fn write_str(&mut self, s: &str);
}

static SINK: Mutex<Option<&'static mut dyn Writer>> = Mutex::new(None);

/// Install the console writer. Called once from boot glue.
pub fn set_writer(writer: &'static mut dyn Writer) {
    *SINK.lock() = Some(writer);
}

struct SinkAdapter<'a>(spin::MutexGuard<'a, Option<&'static mut dyn Writer>>);

impl<'a> fmt::Write for SinkAdapter<'a> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(w) = self.0.as_deref_mut() {
            w.write_str(s);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let mut adapter = SinkAdapter(SINK.lock());
    let _ = adapter.write_fmt(args);
}

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            crate::println!(
                "[{:>5}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Install the `log` facade at the given level. Idempotent in test builds.
pub fn init(level: log::LevelFilter) {
    log::set_max_level(level);
    let _ = log::set_logger(&LOGGER);
}
