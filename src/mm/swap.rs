//! Swap table and anonymous-page backing (spec.md §3 "Swap table", §4.5
//! "Anon backing").

extern crate alloc;

use alloc::vec::Vec;

use crate::devices::{BlockDevice, SECTOR_SIZE};
use crate::error::{KernelError, KernelResult};

use super::PGSIZE;

/// Sectors consumed by one page-sized swap slot (spec.md §3: "slots of 8
/// sectors each").
pub const SECTORS_PER_PAGE: usize = PGSIZE / SECTOR_SIZE;

/// Bitmap over swap slots; bit true means the slot is in use (spec.md §3
/// "Swap table").
pub struct SwapTable {
    in_use: Vec<bool>,
}

impl SwapTable {
    pub fn new(slot_count: usize) -> Self {
        Self {
            in_use: alloc::vec![false; slot_count],
        }
    }

    pub fn slot_count(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_used(&self, slot: usize) -> bool {
        self.in_use[slot]
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        let idx = self.in_use.iter().position(|&used| !used)?;
        self.in_use[idx] = true;
        Some(idx)
    }

    pub fn free_slot(&mut self, slot: usize) {
        debug_assert!(self.in_use[slot], "freeing a swap slot that was not in use");
        self.in_use[slot] = false;
    }
}

/// A page still resident in memory, either never swapped or holding the
/// slot it was last written to (spec.md §3 "anon: swap slot index or
/// 'not swapped'").
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonPage {
    pub slot: Option<usize>,
}

/// Write `content` to `slot`'s sectors without touching the bitmap —
/// used by fork to peek at a swapped-out parent page without disturbing
/// its slot.
pub fn read_slot(dev: &dyn BlockDevice, slot: usize, content: &mut [u8; PGSIZE]) {
    let base = slot * SECTORS_PER_PAGE;
    for i in 0..SECTORS_PER_PAGE {
        dev.read_sector(
            (base + i) as u64,
            &mut content[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
        );
    }
}

fn write_slot(dev: &dyn BlockDevice, slot: usize, content: &[u8; PGSIZE]) {
    let base = slot * SECTORS_PER_PAGE;
    for i in 0..SECTORS_PER_PAGE {
        dev.write_sector(
            (base + i) as u64,
            &content[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE],
        );
    }
}

/// Swap-out: bitmap-scan for a free slot, write the frame content across
/// `PGSIZE/SECTOR_SIZE` consecutive sectors, mark the slot used, store
/// the slot index on the page (spec.md §4.5 Anon backing).
pub fn swap_out(
    dev: &dyn BlockDevice,
    table: &mut SwapTable,
    page: &mut AnonPage,
    content: &[u8; PGSIZE],
) -> KernelResult<()> {
    let slot = table.alloc_slot().ok_or(KernelError::SwapExhausted)?;
    write_slot(dev, slot, content);
    page.slot = Some(slot);
    Ok(())
}

/// Swap-in: read back a previously-swapped page, or zero-fill a fresh
/// anon page that was never swapped (spec.md §4.5: "assert slot bit is
/// set; read back ... clear the slot bit").
pub fn swap_in(
    dev: &dyn BlockDevice,
    table: &mut SwapTable,
    page: &mut AnonPage,
    content: &mut [u8; PGSIZE],
) {
    match page.slot.take() {
        Some(slot) => {
            debug_assert!(table.is_used(slot), "anon page slot index not marked in use");
            read_slot(dev, slot, content);
            table.free_slot(slot);
        }
        None => content.fill(0),
    }
}
