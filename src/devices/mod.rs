//! Block device and console boundaries.
//!
//! spec.md §1 treats the disk driver as "fixed-sector block I/O" and the
//! keyboard/display as a byte-oriented console, and keeps both of their
//! internals out of scope. This module is the pair of narrow traits those
//! boundaries are expressed as — [`BlockDevice`] and [`Console`] — plus
//! in-memory implementations used by the host test suite and by the swap
//! backend's own unit tests. Real drivers (virtio-blk/ATA; 16550 UART or
//! the PC keyboard controller) implement the same traits and are supplied
//! by boot glue; grounded on the teacher's `fs::blockdev` trait-over-
//! concrete-driver split.

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

/// Bytes per sector, fixed for this kernel's disks (spec.md §4.5 anon
/// backing: "PGSIZE/SECTOR_SIZE consecutive sectors").
pub const SECTOR_SIZE: usize = 512;

/// A fixed-sector block device. Every method is synchronous from the
/// caller's point of view; a real driver may block the calling thread
/// while waiting on the underlying hardware (spec.md §5 suspension points:
/// "waiting on disk I/O").
pub trait BlockDevice: Send + Sync {
    /// Total number of `SECTOR_SIZE`-byte sectors this device exposes.
    fn sector_count(&self) -> u64;

    /// Read exactly one sector into `buf` (`buf.len() == SECTOR_SIZE`).
    fn read_sector(&self, sector: u64, buf: &mut [u8]);

    /// Write exactly one sector from `buf` (`buf.len() == SECTOR_SIZE`).
    fn write_sector(&self, sector: u64, buf: &[u8]);
}

/// In-memory stand-in for a disk, backing both host-side unit tests and
/// the swap device before real block drivers exist. Not part of the
/// kernel's production boot path (spec.md §1: disk driver is out of
/// scope), but the same [`BlockDevice`] trait a real driver would
/// implement.
pub struct MemoryBlockDevice {
    sectors: spin::Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemoryBlockDevice {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: spin::Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count]),
        }
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn sector_count(&self) -> u64 {
        self.sectors.lock().len() as u64
    }

    fn read_sector(&self, sector: u64, buf: &mut [u8]) {
        let sectors = self.sectors.lock();
        buf.copy_from_slice(&sectors[sector as usize]);
    }

    fn write_sector(&self, sector: u64, buf: &[u8]) {
        let mut sectors = self.sectors.lock();
        sectors[sector as usize].copy_from_slice(buf);
    }
}

/// Byte-oriented console boundary (keyboard in, display out). spec.md §1
/// keeps the serial/VGA console's own programming out of scope; this is
/// the narrow surface the syscall dispatcher's `read(fd=0)`/`write(fd=1)`
/// (spec.md §4.4) drive instead of touching a device directly.
pub trait Console: Send + Sync {
    /// Read up to `buf.len()` bytes typed at the keyboard, blocking the
    /// caller until at least one byte is available (spec.md §5 suspension
    /// points: "waiting on console input"). A `buf.len() == 0` call
    /// returns `0` immediately without blocking (spec.md §8 boundary).
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Write `buf` to the display/serial output.
    fn write(&self, buf: &[u8]) -> usize;
}

/// In-memory console for the host test suite: `read` drains a
/// pre-loaded input queue instead of blocking, `write` appends to an
/// output buffer a test can inspect.
pub struct MemoryConsole {
    input: spin::Mutex<VecDeque<u8>>,
    output: spin::Mutex<Vec<u8>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self {
            input: spin::Mutex::new(VecDeque::new()),
            output: spin::Mutex::new(Vec::new()),
        }
    }

    /// Test helper: queue bytes as if typed at the keyboard.
    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// Test helper: snapshot everything written so far.
    pub fn written(&self) -> Vec<u8> {
        self.output.lock().clone()
    }
}

impl Default for MemoryConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for MemoryConsole {
    fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut input = self.input.lock();
        let mut n = 0;
        while n < buf.len() {
            match input.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn write(&self, buf: &[u8]) -> usize {
        self.output.lock().extend_from_slice(buf);
        buf.len()
    }
}

lazy_static! {
    /// The one console boot glue (or a test) installs (SPEC_FULL §2:
    /// global singletons follow the same `lazy_static! + spin::Mutex`
    /// idiom as [`crate::sched::SCHEDULER`] and [`crate::mm::VM`]). The
    /// syscall dispatcher's `read(fd=0)`/`write(fd=1)` (spec.md §4.4) go
    /// through this rather than threading a console handle through every
    /// call.
    pub static ref CONSOLE: Mutex<Option<Arc<dyn Console>>> = Mutex::new(None);
}

/// Boot glue (or a test) installs the console once.
pub fn set_console(console: Arc<dyn Console>) {
    *CONSOLE.lock() = Some(console);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_read_of_zero_length_never_blocks_and_returns_zero() {
        let console = MemoryConsole::new();
        let mut buf = [0u8; 0];
        assert_eq!(console.read(&mut buf), 0);
    }

    #[test]
    fn console_write_then_read_round_trips() {
        let console = MemoryConsole::new();
        console.write(b"hi");
        assert_eq!(console.written(), b"hi");
        console.feed(b"ab");
        let mut buf = [0u8; 2];
        assert_eq!(console.read(&mut buf), 2);
        assert_eq!(&buf, b"ab");
    }

    #[test]
    fn round_trips_sector_content() {
        let dev = MemoryBlockDevice::new(4);
        let mut data = [0u8; SECTOR_SIZE];
        data[0] = 0xAB;
        data[SECTOR_SIZE - 1] = 0xCD;
        dev.write_sector(2, &data);

        let mut out = [0u8; SECTOR_SIZE];
        dev.read_sector(2, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn sectors_start_zeroed() {
        let dev = MemoryBlockDevice::new(1);
        let mut out = [0u8; SECTOR_SIZE];
        dev.read_sector(0, &mut out);
        assert_eq!(out, [0u8; SECTOR_SIZE]);
    }
}
