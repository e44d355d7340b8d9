//! Supplemental page table (spec.md §3 "Page descriptor (SPT entry)",
//! §4.5 "SPT").
//!
//! Page descriptors are a tagged variant per spec.md §9's redesign note
//! ("Model the page descriptor as a tagged variant with a swap_in/
//! swap_out/destroy capability set; the first fault performs a tag
//! transition"): [`PageKind::Uninit`] carries a boxed initializer closure
//! bound to its captured auxiliary payload, and the fault handler in
//! [`super::fault`] invokes it exactly once to transition the entry into
//! [`PageKind::Anon`] or [`PageKind::File`].

extern crate alloc;

use alloc::{collections::BTreeMap, sync::Arc};

use crate::error::{KernelError, KernelResult};

use super::{file_backed::FileBackedPage, frame::FrameId, swap::AnonPage, page_round_down};

/// A boxed callable bound to the auxiliary value captured when the
/// uninit page was allocated (spec.md §9). Shared by value (`Arc` clone,
/// not a fresh closure) when a fork copies an uninit page, since the
/// closure's captured state (e.g. a file handle) is itself already
/// reference-counted where it needs independent copies.
pub type Initializer = Arc<dyn Fn() -> PageKind + Send + Sync>;

pub struct UninitPage {
    pub init: Initializer,
}

/// Which typed kind a page currently is (spec.md §3 "kind ∈ {uninit,
/// anon, file-backed}").
pub enum PageKind {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FileBackedPage),
}

/// One entry in a process's supplemental page table (spec.md §3 "Page
/// descriptor (SPT entry)").
pub struct SptEntry {
    pub vpage: u64,
    pub writable: bool,
    pub frame: Option<FrameId>,
    pub kind: PageKind,
    /// Only `Some` on the first page of an mmap region (spec.md §4.5
    /// mmap: "the first page also records the total mapped-page count").
    pub mmap_page_count: Option<u32>,
}

impl SptEntry {
    pub fn new_uninit(vpage: u64, writable: bool, init: Initializer) -> Self {
        Self {
            vpage,
            writable,
            frame: None,
            kind: PageKind::Uninit(UninitPage { init }),
            mmap_page_count: None,
        }
    }

    /// A stack-growth page is installed directly as anon, not uninit —
    /// there is no lazy-initialization step, it just needs zeroed
    /// content (spec.md §4.5 fault handling step 2).
    pub fn new_anon_stack(vpage: u64) -> Self {
        Self {
            vpage,
            writable: true,
            frame: None,
            kind: PageKind::Anon(AnonPage::default()),
            mmap_page_count: None,
        }
    }
}

/// Per-process map from user virtual page to page descriptor (spec.md §3
/// SPT invariants: "at most one SPT entry per (process, virtual page)").
pub struct SupplementalPageTable {
    entries: BTreeMap<u64, SptEntry>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Lookup rounds the argument down to a page (spec.md §4.5 "Lookup
    /// rounds the argument down to a page").
    pub fn lookup(&self, addr: u64) -> Option<&SptEntry> {
        self.entries.get(&page_round_down(addr))
    }

    pub fn lookup_mut(&mut self, addr: u64) -> Option<&mut SptEntry> {
        self.entries.get_mut(&page_round_down(addr))
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.entries.contains_key(&page_round_down(addr))
    }

    /// Insert rejects duplicates (spec.md §4.5 "Insert rejects
    /// duplicates").
    pub fn insert(&mut self, entry: SptEntry) -> KernelResult<()> {
        if self.entries.contains_key(&entry.vpage) {
            return Err(KernelError::DuplicateMapping);
        }
        self.entries.insert(entry.vpage, entry);
        Ok(())
    }

    pub fn remove(&mut self, vpage: u64) -> Option<SptEntry> {
        self.entries.remove(&page_round_down(vpage))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SptEntry> {
        self.entries.values()
    }

    /// All registered virtual pages, for callers (process exit, fork
    /// copy) that need to iterate a snapshot while mutating the table.
    pub fn vpages(&self) -> alloc::vec::Vec<u64> {
        self.entries.keys().copied().collect()
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}
