//! Supplemental page table: what the kernel knows about each user page beyond the hardware
//! page table, whether or not the page is resident.

use super::frame_allocator::AllocFlags;
use crate::swapping::SwapSlot;
use crate::threading::process::Pid;
use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt;
use kidneyos_shared::mem::VirtAddr;

/// Handle to a record in the [`PageArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(usize);

/// Page metadata record.
#[derive(Clone, Copy)]
pub struct SupPte {
    pub vaddr: VirtAddr,
    pub owner: Pid,
    pub writable: bool,
    pub flags: AllocFlags,
    /// Cleared while the page is being loaded, and while a syscall pins it.
    pub evictable: bool,
    pub is_mmap: bool,
    /// A frame table entry references this record.
    pub resident: bool,
    /// Where the page's content lives while it is swapped out.
    pub swap_slot: Option<SwapSlot>,
    /// Allocation tick at which the page was created. The replacement policy only looks at
    /// accessed bits, so nothing reads this yet.
    pub allocated_at: u64,
}

impl SupPte {
    /// A page that is registered but has never been resident.
    pub fn lazy(owner: Pid, vaddr: VirtAddr, flags: AllocFlags, writable: bool) -> Self {
        Self {
            vaddr,
            owner,
            writable,
            flags,
            evictable: true,
            is_mmap: false,
            resident: false,
            swap_slot: None,
            allocated_at: 0,
        }
    }
}

impl fmt::Debug for SupPte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupPte")
            .field("vaddr", &self.vaddr)
            .field("owner", &self.owner)
            .field("writable", &self.writable)
            .field("flags", &self.flags.raw_value())
            .field("evictable", &self.evictable)
            .field("is_mmap", &self.is_mmap)
            .field("resident", &self.resident)
            .field("swap_slot", &self.swap_slot)
            .field("allocated_at", &self.allocated_at)
            .finish()
    }
}

/// Storage for every page metadata record in the system, addressed by [`PageId`].
#[derive(Default)]
pub struct PageArena {
    records: Vec<Option<SupPte>>,
    free: Vec<usize>,
}

impl PageArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: SupPte) -> PageId {
        match self.free.pop() {
            Some(slot) => {
                self.records[slot] = Some(record);
                PageId(slot)
            }
            None => {
                self.records.push(Some(record));
                PageId(self.records.len() - 1)
            }
        }
    }

    /// # Panics
    ///
    /// Panics if `page` was removed. Handles are only held by page tables and frame table
    /// entries, which drop them before the record is removed.
    pub fn get(&self, page: PageId) -> &SupPte {
        self.records[page.0].as_ref().expect(STALE_PAGE)
    }

    /// # Panics
    ///
    /// See [`PageArena::get`].
    pub fn get_mut(&mut self, page: PageId) -> &mut SupPte {
        self.records[page.0].as_mut().expect(STALE_PAGE)
    }

    pub fn remove(&mut self, page: PageId) -> Option<SupPte> {
        let record = self.records.get_mut(page.0)?.take()?;
        self.free.push(page.0);
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.records.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const STALE_PAGE: &str = "page arena consistency error: reference to a removed page record";

/// One process's page metadata table: virtual page to record.
#[derive(Debug, Default)]
pub struct SupPageTable(BTreeMap<VirtAddr, PageId>);

impl SupPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vaddr: VirtAddr) -> Option<PageId> {
        self.0.get(&vaddr).copied()
    }

    pub fn contains(&self, vaddr: VirtAddr) -> bool {
        self.0.contains_key(&vaddr)
    }

    /// Returns `false` (and changes nothing) if `vaddr` already has a record.
    #[must_use]
    pub fn insert(&mut self, vaddr: VirtAddr, page: PageId) -> bool {
        if self.contains(vaddr) {
            return false;
        }
        self.0.insert(vaddr, page);
        true
    }

    pub fn remove(&mut self, vaddr: VirtAddr) -> Option<PageId> {
        self.0.remove(&vaddr)
    }

    pub fn vaddrs(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
