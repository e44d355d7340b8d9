//! Hardware page-table mapping boundary.
//!
//! Programming the actual x86_64 paging structures is not one of the
//! four named subsystems in spec.md §2 (unlike the interrupt controller
//! and boot loader it is not called out explicitly, but it is exactly the
//! same kind of hardware-glue concern) — the VM core only needs to
//! install/remove a mapping and read/clear the accessed and dirty bits.
//! [`PageTableOps`] is that narrow surface; [`SoftPageTable`] is the one
//! implementation this crate ships, standing in for whatever real
//! CR3-backed page table boot glue would provide (SPEC_FULL §2: "narrow
//! hardware traits... that bare-metal and test builds implement
//! differently").

extern crate alloc;

use alloc::collections::BTreeMap;

/// Per-page hardware state a real page-table entry would carry.
#[derive(Debug, Clone, Copy)]
struct Mapping {
    frame_addr: u64,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// Operations the VM core (`mm::fault`, `mm::mmap`, frame eviction) needs
/// on one process's hardware page table.
pub trait PageTableOps: Send + Sync {
    fn map(&mut self, vaddr: u64, frame_addr: u64, writable: bool);
    fn unmap(&mut self, vaddr: u64);
    fn is_present(&self, vaddr: u64) -> bool;
    fn is_writable(&self, vaddr: u64) -> bool;
    /// The frame address a present mapping resolves to (spec.md §4.4 user
    /// buffer access: the dispatcher copies into/out of the caller's
    /// mapped frames rather than dereferencing the user pointer itself).
    fn translate(&self, vaddr: u64) -> Option<u64>;
    fn is_accessed(&self, vaddr: u64) -> bool;
    fn clear_accessed(&mut self, vaddr: u64);
    fn is_dirty(&self, vaddr: u64) -> bool;
    fn clear_dirty(&mut self, vaddr: u64);
    /// Record a write having occurred (used by test code and would, on
    /// real hardware, simply be the CPU setting the dirty bit itself).
    fn mark_dirty(&mut self, vaddr: u64);
    /// Record an access (read or write) having occurred.
    fn mark_accessed(&mut self, vaddr: u64);
}

/// A page table kept as a `BTreeMap`, not a real radix-tree paging
/// structure. This is the kernel's one stand-in for hardware page tables;
/// bare-metal boot glue that wants real x86_64 paging would implement
/// [`PageTableOps`] against the `x86_64` crate's `Mapper` instead.
#[derive(Default)]
pub struct SoftPageTable {
    entries: BTreeMap<u64, Mapping>,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl PageTableOps for SoftPageTable {
    fn map(&mut self, vaddr: u64, frame_addr: u64, writable: bool) {
        self.entries.insert(
            vaddr,
            Mapping {
                frame_addr,
                writable,
                accessed: false,
                dirty: false,
            },
        );
    }

    fn unmap(&mut self, vaddr: u64) {
        self.entries.remove(&vaddr);
    }

    fn is_present(&self, vaddr: u64) -> bool {
        self.entries.contains_key(&vaddr)
    }

    fn is_writable(&self, vaddr: u64) -> bool {
        self.entries.get(&vaddr).map(|m| m.writable).unwrap_or(false)
    }

    fn translate(&self, vaddr: u64) -> Option<u64> {
        self.entries.get(&vaddr).map(|m| m.frame_addr)
    }

    fn is_accessed(&self, vaddr: u64) -> bool {
        self.entries.get(&vaddr).map(|m| m.accessed).unwrap_or(false)
    }

    fn clear_accessed(&mut self, vaddr: u64) {
        if let Some(m) = self.entries.get_mut(&vaddr) {
            m.accessed = false;
        }
    }

    fn is_dirty(&self, vaddr: u64) -> bool {
        self.entries.get(&vaddr).map(|m| m.dirty).unwrap_or(false)
    }

    fn clear_dirty(&mut self, vaddr: u64) {
        if let Some(m) = self.entries.get_mut(&vaddr) {
            m.dirty = false;
        }
    }

    fn mark_dirty(&mut self, vaddr: u64) {
        if let Some(m) = self.entries.get_mut(&vaddr) {
            m.dirty = true;
            m.accessed = true;
        }
    }

    fn mark_accessed(&mut self, vaddr: u64) {
        if let Some(m) = self.entries.get_mut(&vaddr) {
            m.accessed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_unmap_clears_presence() {
        let mut pt = SoftPageTable::new();
        pt.map(0x1000, 0xA000, true);
        assert!(pt.is_present(0x1000));
        pt.unmap(0x1000);
        assert!(!pt.is_present(0x1000));
    }

    #[test]
    fn translate_resolves_the_mapped_frame_address() {
        let mut pt = SoftPageTable::new();
        assert_eq!(pt.translate(0x3000), None);
        pt.map(0x3000, 0xC000, false);
        assert_eq!(pt.translate(0x3000), Some(0xC000));
    }

    #[test]
    fn accessed_and_dirty_bits_default_clear() {
        let mut pt = SoftPageTable::new();
        pt.map(0x2000, 0xB000, true);
        assert!(!pt.is_accessed(0x2000));
        assert!(!pt.is_dirty(0x2000));
        pt.mark_dirty(0x2000);
        assert!(pt.is_dirty(0x2000));
        assert!(pt.is_accessed(0x2000));
        pt.clear_dirty(0x2000);
        assert!(!pt.is_dirty(0x2000));
    }
}
