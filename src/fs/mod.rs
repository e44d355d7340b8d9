//! File-system boundary.
//!
//! spec.md §1 treats the on-disk format as "an external byte-addressable
//! file store providing open/read/write/seek/length/close/deny_write/
//! reopen/duplicate" and keeps it out of scope. [`FileSystem`] and
//! [`FileHandle`] are exactly that boundary, narrow traits a real on-disk
//! filesystem (or, for the host test suite and ELF-loader tests, the
//! in-memory [`MemFs`] below) implements — grounded on the teacher's
//! `fs::ramfs` in-memory node pattern (`BTreeMap<String, Arc<Node>>` behind
//! an `RwLock`), narrowed to the byte-range operations this kernel's
//! process/VM/syscall layers actually call.

extern crate alloc;

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

/// An open file handle. Each `open`/`reopen`/`duplicate` call returns an
/// independent handle with its own seek position (spec.md §3 "duplicated
/// descriptors in a fork share nothing except initial content"); all
/// handles on the same underlying file see the same content and the same
/// deny-write state.
pub trait FileHandle: Send + Sync {
    /// Read up to `buf.len()` bytes at the current position, advancing it.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Write `buf` at the current position, advancing it. Returns `0`
    /// without modifying content if deny-write is active (spec.md §8
    /// boundary: "Writing to an executable that is currently running
    /// returns 0 bytes written").
    fn write(&self, buf: &[u8]) -> usize;

    /// Reposition this handle's cursor (`seek` syscall).
    fn seek(&self, pos: u64);

    /// This handle's current cursor position (`tell` syscall).
    fn tell(&self) -> u64;

    /// Current length of the underlying file, independent of any handle's
    /// cursor (`filesize` syscall).
    fn length(&self) -> u64;

    /// Mark the underlying file deny-write (ELF loader §4.3: the running
    /// executable's handle is deny-write until process exit closes it).
    fn deny_write(&self);

    /// Clear deny-write (process exit closing the executable handle
    /// "re-enables writes to it", spec.md §4.2 Exit).
    fn allow_write(&self);

    /// A fresh handle on the same file, cursor reset to 0 (used by mmap
    /// and exec to avoid racing the caller's own handle, spec.md §4.2/§4.5).
    fn reopen(&self) -> Arc<dyn FileHandle>;

    /// A fresh handle on the same file, cursor copied from this one (used
    /// by fork to give the child independent fd state, spec.md §4.2).
    fn duplicate(&self) -> Arc<dyn FileHandle>;
}

/// The external file store boundary itself: path-addressed creation,
/// removal, and opening.
pub trait FileSystem: Send + Sync {
    fn create(&self, path: &str, size: u64) -> bool;
    fn remove(&self, path: &str) -> bool;
    fn open(&self, path: &str) -> Option<Arc<dyn FileHandle>>;
}

struct Inode {
    data: RwLock<Vec<u8>>,
    deny_write_count: AtomicU64,
}

struct MemHandle {
    inode: Arc<Inode>,
    pos: spin::Mutex<u64>,
}

impl FileHandle for MemHandle {
    fn read(&self, buf: &mut [u8]) -> usize {
        let data = self.inode.data.read();
        let mut pos = self.pos.lock();
        let start = *pos as usize;
        if start >= data.len() {
            return 0;
        }
        let n = core::cmp::min(buf.len(), data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *pos += n as u64;
        n
    }

    fn write(&self, buf: &[u8]) -> usize {
        if self.inode.deny_write_count.load(Ordering::SeqCst) > 0 {
            return 0;
        }
        let mut data = self.inode.data.write();
        let mut pos = self.pos.lock();
        let start = *pos as usize;
        if start + buf.len() > data.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        *pos += buf.len() as u64;
        buf.len()
    }

    fn seek(&self, pos: u64) {
        *self.pos.lock() = pos;
    }

    fn tell(&self) -> u64 {
        *self.pos.lock()
    }

    fn length(&self) -> u64 {
        self.inode.data.read().len() as u64
    }

    fn deny_write(&self) {
        self.inode.deny_write_count.fetch_add(1, Ordering::SeqCst);
    }

    fn allow_write(&self) {
        self.inode.deny_write_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn reopen(&self) -> Arc<dyn FileHandle> {
        Arc::new(MemHandle {
            inode: self.inode.clone(),
            pos: spin::Mutex::new(0),
        })
    }

    fn duplicate(&self) -> Arc<dyn FileHandle> {
        Arc::new(MemHandle {
            inode: self.inode.clone(),
            pos: spin::Mutex::new(*self.pos.lock()),
        })
    }
}

/// In-memory file store used by the host test suite and by ELF-loader
/// tests. Not part of the bare-metal boot path — a real on-disk format is
/// out of scope (spec.md §1) and would implement [`FileSystem`] the same
/// way.
pub struct MemFs {
    files: RwLock<BTreeMap<String, Arc<Inode>>>,
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Test/bring-up helper: create a file and immediately fill its
    /// content (distinct from `create`, which only reserves `size` zero
    /// bytes, matching the `create(path, size)` syscall contract).
    pub fn put(&self, path: &str, content: &[u8]) {
        self.files.write().insert(
            String::from(path),
            Arc::new(Inode {
                data: RwLock::new(Vec::from(content)),
                deny_write_count: AtomicU64::new(0),
            }),
        );
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemFs {
    fn create(&self, path: &str, size: u64) -> bool {
        let mut files = self.files.write();
        if files.contains_key(path) {
            return false;
        }
        files.insert(
            String::from(path),
            Arc::new(Inode {
                data: RwLock::new(alloc::vec![0u8; size as usize]),
                deny_write_count: AtomicU64::new(0),
            }),
        );
        true
    }

    fn remove(&self, path: &str) -> bool {
        self.files.write().remove(path).is_some()
    }

    fn open(&self, path: &str) -> Option<Arc<dyn FileHandle>> {
        let inode = self.files.read().get(path).cloned()?;
        Some(Arc::new(MemHandle {
            inode,
            pos: spin::Mutex::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_seek_then_read_round_trips() {
        let fs = MemFs::new();
        fs.create("/a", 0);
        let h = fs.open("/a").unwrap();
        h.write(b"hello world");
        h.seek(0);
        let mut buf = [0u8; 11];
        let n = h.read(&mut buf);
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn deny_write_blocks_writes_across_handles() {
        let fs = MemFs::new();
        fs.create("/exe", 4);
        let h1 = fs.open("/exe").unwrap();
        let h2 = h1.reopen();
        h1.deny_write();
        assert_eq!(h2.write(b"xx"), 0);
        h1.allow_write();
        assert_eq!(h2.write(b"xx"), 2);
    }

    #[test]
    fn duplicate_preserves_position_reopen_resets_it() {
        let fs = MemFs::new();
        fs.create("/a", 0);
        let h = fs.open("/a").unwrap();
        h.write(b"abcdef");
        h.seek(3);
        let dup = h.duplicate();
        assert_eq!(dup.tell(), 3);
        let reopened = h.reopen();
        assert_eq!(reopened.tell(), 0);
    }

    #[test]
    fn open_missing_file_returns_none() {
        let fs = MemFs::new();
        assert!(fs.open("/missing").is_none());
    }
}
