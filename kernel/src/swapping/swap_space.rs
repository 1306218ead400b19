use super::{SwapSlot, SWAP_SCAN_SLOTS};
use crate::block::block_core::{BlockDevice, BlockSector, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use alloc::{boxed::Box, vec, vec::Vec};
use core::ops::Range;
use kidneyos_shared::mem::{PAGE_FRAME_SIZE, SECTORS_PER_PAGE};
use kidneyos_shared::println;

/// Page-granular swap storage: a block device split into page-sized slots plus a bitmap of
/// which slots hold an evicted page.
pub struct SwapSpace {
    device: Box<dyn BlockDevice>,
    /// One bit per slot, set while the slot is in use.
    bitmap: Vec<u64>,
    slots: usize,
    in_use: usize,
}

impl SwapSpace {
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let slots = (device.size() / SECTORS_PER_PAGE) as usize;
        println!("Swap: {} slots of {} bytes", slots, PAGE_FRAME_SIZE);

        Self {
            device,
            bitmap: vec![0; slots.div_ceil(64)],
            slots,
            in_use: 0,
        }
    }

    /// Total number of slots on the device.
    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn slots_in_use(&self) -> usize {
        self.in_use
    }

    /// The region eviction searches for a free slot.
    pub fn scan_range(&self) -> Range<usize> {
        0..self.slots.min(SWAP_SCAN_SLOTS)
    }

    pub fn is_used(&self, slot: SwapSlot) -> bool {
        self.bitmap[slot.0 / 64] & (1 << (slot.0 % 64)) != 0
    }

    /// First free slot in `range`, without claiming it.
    pub fn scan_free(&self, range: Range<usize>) -> Option<SwapSlot> {
        let end = range.end.min(self.slots);
        let mut slot = range.start;
        while slot < end {
            let group = self.bitmap[slot / 64] >> (slot % 64);
            if group == u64::MAX >> (slot % 64) {
                // Rest of this group is in use.
                slot = (slot / 64 + 1) * 64;
                continue;
            }
            let candidate = slot + (!group).trailing_zeros() as usize;
            return (candidate < end).then_some(SwapSlot(candidate));
        }
        None
    }

    pub fn mark_used(&mut self, slot: SwapSlot) {
        debug_assert!(!self.is_used(slot), "{slot} is already in use");
        self.bitmap[slot.0 / 64] |= 1 << (slot.0 % 64);
        self.in_use += 1;
    }

    /// Return `slot` to the free pool.
    pub fn reset(&mut self, slot: SwapSlot) {
        debug_assert!(self.is_used(slot), "{slot} is not in use");
        self.bitmap[slot.0 / 64] &= !(1 << (slot.0 % 64));
        self.in_use -= 1;
    }

    /// Read the page stored in `slot` into `page`.
    pub fn read_block(
        &mut self,
        slot: SwapSlot,
        page: &mut [u8; PAGE_FRAME_SIZE],
    ) -> Result<(), BlockError> {
        let first = self.first_sector(slot)?;
        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            self.device.read(first + i as BlockSector, sector)?;
        }
        Ok(())
    }

    /// Write `page` into `slot`.
    pub fn write_block(
        &mut self,
        slot: SwapSlot,
        page: &[u8; PAGE_FRAME_SIZE],
    ) -> Result<(), BlockError> {
        let first = self.first_sector(slot)?;
        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            self.device.write(first + i as BlockSector, sector)?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn first_sector(&self, slot: SwapSlot) -> Result<BlockSector, BlockError> {
        if slot.0 >= self.slots {
            return Err(BlockError::SectorOutOfBounds);
        }
        Ok(slot.0 as BlockSector * SECTORS_PER_PAGE)
    }
}
