use super::sup_page_table::PageId;
use crate::threading::process::Pid;
use alloc::vec::Vec;
use kidneyos_shared::mem::{FrameNumber, VirtAddr};

/// One resident page: `frame` belongs to this entry until the page is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTableEntry {
    pub owner: Pid,
    pub frame: FrameNumber,
    /// The page metadata record this frame backs.
    pub page: PageId,
    pub vaddr: VirtAddr,
}

/// Every resident user frame, in the order the clock hand visits them.
#[derive(Debug, Default)]
pub struct FrameTable {
    entries: Vec<FrameTableEntry>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: FrameTableEntry) {
        debug_assert!(
            self.position(entry.frame).is_none(),
            "{} is already in the frame table",
            entry.frame
        );
        self.entries.push(entry);
    }

    pub fn remove(&mut self, index: usize) -> FrameTableEntry {
        self.entries.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&FrameTableEntry> {
        self.entries.get(index)
    }

    /// Ring index of the entry owning `frame`.
    pub fn position(&self, frame: FrameNumber) -> Option<usize> {
        self.entries.iter().position(|entry| entry.frame == frame)
    }

    /// The entry backing `vaddr` in process `owner`, if that page is resident.
    pub fn search(&self, owner: Pid, vaddr: VirtAddr) -> Option<&FrameTableEntry> {
        self.entries
            .iter()
            .find(|entry| entry.owner == owner && entry.vaddr == vaddr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameTableEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
