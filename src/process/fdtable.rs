//! Per-process file-descriptor table (spec.md §3 "File descriptor table").
//!
//! Fixed-size array, 2 pages by convention (spec.md: "default 128 slots, 2
//! pages"); slots 0/1 are stdin/stdout sentinels, slot *i* >= 2 maps to a
//! file handle or sits empty. Grounded on the teacher's fixed-capacity
//! resource-table pattern (`cap::table`-style arrays indexed by handle),
//! narrowed to the single `FileHandle` trait object this kernel needs.

extern crate alloc;

use alloc::sync::Arc;

use crate::{error::KernelError, fs::FileHandle};

/// Total slots, including the two reserved stdio sentinels (spec.md §3).
pub const FD_TABLE_SIZE: usize = 128;
/// Lowest fd a real file can occupy; 0 and 1 are stdin/stdout.
pub const FIRST_FILE_FD: usize = 2;

pub const FD_STDIN: i32 = 0;
pub const FD_STDOUT: i32 = 1;

enum Slot {
    Empty,
    Stdio,
    File(Arc<dyn FileHandle>),
}

/// Fixed-size file-descriptor table owned by one process.
pub struct FdTable {
    slots: alloc::vec::Vec<Slot>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut slots = alloc::vec::Vec::with_capacity(FD_TABLE_SIZE);
        slots.push(Slot::Stdio); // fd 0
        slots.push(Slot::Stdio); // fd 1
        for _ in FIRST_FILE_FD..FD_TABLE_SIZE {
            slots.push(Slot::Empty);
        }
        Self { slots }
    }

    /// Install a handle in the first free slot >= 2 (spec.md §4.4 `open`).
    /// Returns `NoFreeFd` when the table is full (spec.md §8: "`open` with
    /// a full descriptor table returns -1").
    pub fn insert(&mut self, handle: Arc<dyn FileHandle>) -> Result<i32, KernelError> {
        for (i, slot) in self.slots.iter_mut().enumerate().skip(FIRST_FILE_FD) {
            if matches!(slot, Slot::Empty) {
                *slot = Slot::File(handle);
                return Ok(i as i32);
            }
        }
        Err(KernelError::NoFreeFd)
    }

    pub fn get(&self, fd: i32) -> Result<&Arc<dyn FileHandle>, KernelError> {
        let slot = self.slot(fd)?;
        match slot {
            Slot::File(h) => Ok(h),
            _ => Err(KernelError::BadFd),
        }
    }

    /// Close the slot, dropping the handle (spec.md §3: "closing a slot
    /// empties it").
    pub fn close(&mut self, fd: i32) -> Result<(), KernelError> {
        let idx = Self::index(fd)?;
        if idx < FIRST_FILE_FD {
            return Err(KernelError::BadFd);
        }
        match self.slots.get_mut(idx) {
            Some(slot @ Slot::File(_)) => {
                *slot = Slot::Empty;
                Ok(())
            }
            _ => Err(KernelError::BadFd),
        }
    }

    /// Close every open slot >= 2 (spec.md §4.2 Exit: "Closes every
    /// file-descriptor slot").
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut().skip(FIRST_FILE_FD) {
            *slot = Slot::Empty;
        }
    }

    /// Build the child's table for fork: slots 0/1 inherit the stdio
    /// sentinel by reference, slots 2..N get an independent handle via
    /// `FileHandle::duplicate` (spec.md §4.2 Fork).
    pub fn duplicate(&self) -> Self {
        let mut slots = alloc::vec::Vec::with_capacity(FD_TABLE_SIZE);
        slots.push(Slot::Stdio);
        slots.push(Slot::Stdio);
        for slot in self.slots.iter().skip(FIRST_FILE_FD) {
            slots.push(match slot {
                Slot::File(h) => Slot::File(h.duplicate()),
                _ => Slot::Empty,
            });
        }
        Self { slots }
    }

    fn index(fd: i32) -> Result<usize, KernelError> {
        if fd < 0 || fd as usize >= FD_TABLE_SIZE {
            return Err(KernelError::BadFd);
        }
        Ok(fd as usize)
    }

    fn slot(&self, fd: i32) -> Result<&Slot, KernelError> {
        let idx = Self::index(fd)?;
        self.slots.get(idx).ok_or(KernelError::BadFd)
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
