use crate::vfs::FileHandle;
use alloc::{collections::BTreeMap, vec::Vec};
use kidneyos_shared::mem::{VirtAddr, PAGE_FRAME_SIZE};

/// Where one page of a memory-mapped file lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapInfo {
    pub file: FileHandle,
    /// Bytes of the page backed by the file; the rest of the page reads as zero.
    pub length: usize,
    /// Offset of the page's first byte within the file.
    pub offset: u64,
}

/// Lookup of the mmap backing record for a page.
pub trait MmapRegions {
    fn find(&self, vaddr: VirtAddr) -> Option<MmapInfo>;
}

/// The mmap backing records of one process, one per mapped page.
#[derive(Debug, Default, Clone)]
pub struct MmapTable(BTreeMap<VirtAddr, MmapInfo>);

impl MmapTable {
    /// New empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the backing of a single page. Returns `false` if the page already has one.
    #[must_use]
    pub fn insert(&mut self, vaddr: VirtAddr, info: MmapInfo) -> bool {
        debug_assert!(vaddr.is_page_aligned());
        if self.0.contains_key(&vaddr) {
            return false;
        }
        self.0.insert(vaddr, info);
        true
    }

    /// Back the pages starting at `start` with `length` bytes of `file` from `offset`.
    /// The last page is partial if `length` is not a multiple of the page size.
    ///
    /// Returns the addresses of the mapped pages, or `None` (mapping nothing) if the range is
    /// empty, misaligned, overflows, or overlaps an existing mapping.
    pub fn map_region(
        &mut self,
        start: VirtAddr,
        file: FileHandle,
        offset: u64,
        length: usize,
    ) -> Option<Vec<VirtAddr>> {
        if length == 0 || !start.is_page_aligned() {
            return None;
        }
        let pages = length.div_ceil(PAGE_FRAME_SIZE);
        let end = start.checked_add_pages(pages)?;
        if self.0.range(start..end).next().is_some() {
            return None;
        }

        // Build every record first so a range that overflows maps nothing.
        let mut records = Vec::with_capacity(pages);
        for page in 0..pages {
            let vaddr = start.checked_add_pages(page)?;
            let skipped = page * PAGE_FRAME_SIZE;
            let info = MmapInfo {
                file,
                length: (length - skipped).min(PAGE_FRAME_SIZE),
                offset: offset.checked_add(skipped as u64)?,
            };
            records.push((vaddr, info));
        }

        let mapped = records.iter().map(|&(vaddr, _)| vaddr).collect();
        self.0.extend(records);
        Some(mapped)
    }

    pub fn remove(&mut self, vaddr: VirtAddr) -> Option<MmapInfo> {
        self.0.remove(&vaddr)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl MmapRegions for MmapTable {
    fn find(&self, vaddr: VirtAddr) -> Option<MmapInfo> {
        self.0.get(&vaddr.page_round_down()).copied()
    }
}
