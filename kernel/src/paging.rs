//! Per-process address-space primitive: install or clear a single user mapping and expose the
//! hardware accessed and dirty bits.

use alloc::collections::BTreeMap;
use kidneyos_shared::{
    mem::{FrameNumber, VirtAddr},
    paging::PageTableEntry,
};

/// The mapping operations the memory core needs from a process's page directory.
///
/// All addresses passed in are page aligned.
pub trait AddressSpace: Send {
    /// Map `vaddr` to `frame`. Returns `false` if `vaddr` is already mapped or the mapping
    /// cannot be created.
    #[must_use]
    fn install(&mut self, vaddr: VirtAddr, frame: FrameNumber, writable: bool) -> bool;
    /// Remove the mapping for `vaddr`, if any.
    fn clear(&mut self, vaddr: VirtAddr);
    fn is_accessed(&self, vaddr: VirtAddr) -> bool;
    fn set_accessed(&mut self, vaddr: VirtAddr, accessed: bool);
    fn is_dirty(&self, vaddr: VirtAddr) -> bool;
    fn set_dirty(&mut self, vaddr: VirtAddr, dirty: bool);
    /// The frame `vaddr` is mapped to, if it is mapped.
    fn translate(&self, vaddr: VirtAddr) -> Option<FrameNumber>;
}

/// A page directory kept as a sparse map from page number to page table entry.
///
/// The CPU sets accessed and dirty bits on a real page table; here the owner of a `PageMap`
/// (the fault path, or a test standing in for user code) sets them through [`AddressSpace`].
#[derive(Default)]
pub struct PageMap {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of present mappings.
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn is_writable(&self, vaddr: VirtAddr) -> bool {
        self.entry(vaddr).is_some_and(|entry| entry.read_write())
    }

    fn entry(&self, vaddr: VirtAddr) -> Option<&PageTableEntry> {
        self.entries.get(&vaddr.page_number())
    }

    fn update(&mut self, vaddr: VirtAddr, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        if let Some(entry) = self.entries.get_mut(&vaddr.page_number()) {
            *entry = f(*entry);
        }
    }
}

impl AddressSpace for PageMap {
    fn install(&mut self, vaddr: VirtAddr, frame: FrameNumber, writable: bool) -> bool {
        if !vaddr.is_user() || self.entries.contains_key(&vaddr.page_number()) {
            return false;
        }
        self.entries.insert(
            vaddr.page_number(),
            PageTableEntry::user_page(frame, writable),
        );
        true
    }

    fn clear(&mut self, vaddr: VirtAddr) {
        self.entries.remove(&vaddr.page_number());
    }

    fn is_accessed(&self, vaddr: VirtAddr) -> bool {
        self.entry(vaddr).is_some_and(|entry| entry.accessed())
    }

    fn set_accessed(&mut self, vaddr: VirtAddr, accessed: bool) {
        self.update(vaddr, |entry| entry.with_accessed(accessed));
    }

    fn is_dirty(&self, vaddr: VirtAddr) -> bool {
        self.entry(vaddr).is_some_and(|entry| entry.dirty())
    }

    fn set_dirty(&mut self, vaddr: VirtAddr, dirty: bool) {
        self.update(vaddr, |entry| entry.with_dirty(dirty));
    }

    fn translate(&self, vaddr: VirtAddr) -> Option<FrameNumber> {
        self.entry(vaddr).map(PageTableEntry::frame)
    }
}
