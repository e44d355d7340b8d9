//! Global frame table (spec.md §3 "Frame", §4.5 "Frame acquisition").
//!
//! A fixed-size pool of physical pages, each either free or owned by
//! exactly one (thread, virtual page) pair. Victim selection walks the
//! pool in clock order.

use crate::sched::thread::Tid;

use super::PGSIZE;

/// Opaque handle to one slot in the [`FrameTable`]'s pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId(pub usize);

/// Back-pointer from a frame to the page descriptor that owns it (spec.md
/// §3 Frame: "back-pointer to owning page descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    pub tid: Tid,
    pub vpage: u64,
}

/// Global list of physical frames in the user pool (spec.md §2 "Frame
/// table + swap"). Owns the actual page content directly — on bare metal
/// this pool would instead be a range of identity-mapped physical memory
/// handed over by the boot loader (out of scope, spec.md §1); the
/// allocation strategy and clock-hand eviction above it are identical
/// either way.
pub struct FrameTable {
    pool: alloc::vec::Vec<alloc::boxed::Box<[u8; PGSIZE]>>,
    owners: alloc::vec::Vec<Option<FrameOwner>>,
    hand: usize,
}

impl FrameTable {
    pub fn new(pool_size: usize) -> Self {
        assert!(pool_size > 0, "frame pool must have at least one frame");
        Self {
            pool: (0..pool_size)
                .map(|_| alloc::boxed::Box::new([0u8; PGSIZE]))
                .collect(),
            owners: alloc::vec![None; pool_size],
            hand: 0,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn owner(&self, id: FrameId) -> Option<FrameOwner> {
        self.owners[id.0]
    }

    pub fn set_owner(&mut self, id: FrameId, owner: FrameOwner) {
        self.owners[id.0] = Some(owner);
    }

    pub fn clear_owner(&mut self, id: FrameId) {
        self.owners[id.0] = None;
    }

    pub fn content(&self, id: FrameId) -> &[u8; PGSIZE] {
        &self.pool[id.0]
    }

    pub fn content_mut(&mut self, id: FrameId) -> &mut [u8; PGSIZE] {
        &mut self.pool[id.0]
    }

    /// Allocate a free frame for `owner`, if one exists. Does not evict —
    /// callers fall back to [`Self::select_victim`] when this returns
    /// `None` (spec.md §4.5: "Allocate a physical frame from the user
    /// pool. If none, select a victim via the clock policy").
    pub fn alloc(&mut self, owner: FrameOwner) -> Option<FrameId> {
        let idx = self.owners.iter().position(Option::is_none)?;
        self.owners[idx] = Some(owner);
        Some(FrameId(idx))
    }

    /// Clock-hand victim selection (spec.md §4.5): walk from the hand; a
    /// frame whose owner is null or whose accessed bit is clear is the
    /// victim, otherwise clear its accessed bit and advance.
    ///
    /// `probe` reads the *hardware* accessed bit of the owning process's
    /// mapping and, if set, clears it as a side effect and returns
    /// `true` ("skip, keep walking"); if clear, returns `false` ("this
    /// frame is the victim"). Folding the check-and-clear into one
    /// `FnMut` (rather than two closures, one shared one unique) avoids
    /// needing both a shared and a mutable borrow of the caller's
    /// scheduler lock guard at once.
    pub fn select_victim(&mut self, mut probe: impl FnMut(FrameOwner) -> bool) -> FrameId {
        let n = self.owners.len();
        loop {
            let i = self.hand;
            self.hand = (self.hand + 1) % n;
            match self.owners[i] {
                None => return FrameId(i),
                Some(owner) => {
                    if !probe(owner) {
                        return FrameId(i);
                    }
                }
            }
        }
    }
}
