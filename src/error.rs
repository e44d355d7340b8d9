//! Kernel-wide error type.
//!
//! Mirrors the teacher's single structured `KernelError` enum rather than a
//! per-module error zoo, specialized to the four cores this kernel actually
//! has (see spec.md §7 Error Handling Design).

use core::fmt;

/// A recoverable kernel error. Syscalls never panic on these — every
/// failure is a return-value convention (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No free frame and no victim could be evicted (pool exhausted or swap full).
    OutOfMemory,
    /// Swap table has no free slot.
    SwapExhausted,
    /// A user-supplied pointer failed validation (null, kernel address, or unmapped).
    BadUserPointer { addr: usize },
    /// ELF header or program header failed validation.
    BadElf,
    /// PT_DYNAMIC/PT_INTERP/PT_SHLIB or another unsupported segment kind.
    UnsupportedElfSegment,
    /// No free slot in the process's file-descriptor table.
    NoFreeFd,
    /// The given fd does not refer to an open file.
    BadFd,
    /// Underlying file store reported the file does not exist.
    NoSuchFile,
    /// An SPT entry already exists at that virtual page.
    DuplicateMapping,
    /// mmap arguments (address/offset alignment, zero length) were invalid.
    BadMmapArgs,
    /// Target of wait()/fork() bookkeeping is not a direct child, or has
    /// already been reaped.
    NotAChild,
    /// A kernel invariant was violated. Never reachable from user input —
    /// only from implementation bugs (spec.md §7 kind 5).
    Fatal(&'static str),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::SwapExhausted => write!(f, "swap exhausted"),
            KernelError::BadUserPointer { addr } => {
                write!(f, "bad user pointer: {addr:#x}")
            }
            KernelError::BadElf => write!(f, "invalid ELF image"),
            KernelError::UnsupportedElfSegment => write!(f, "unsupported ELF segment"),
            KernelError::NoFreeFd => write!(f, "no free file descriptor"),
            KernelError::BadFd => write!(f, "bad file descriptor"),
            KernelError::NoSuchFile => write!(f, "no such file"),
            KernelError::DuplicateMapping => write!(f, "duplicate page table mapping"),
            KernelError::BadMmapArgs => write!(f, "invalid mmap arguments"),
            KernelError::NotAChild => write!(f, "not a direct child or already reaped"),
            KernelError::Fatal(msg) => write!(f, "fatal kernel invariant violation: {msg}"),
        }
    }
}

pub type KernelResult<T> = Result<T, KernelError>;
