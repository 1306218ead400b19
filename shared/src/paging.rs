// https://wiki.osdev.org/Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::FrameNumber;
use arbitrary_int::u20;
use bitbybit::bitfield;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    pub present: bool,
    #[bit(1, rw)]
    pub read_write: bool,
    #[bit(2, rw)]
    pub user_supervisor: bool,
    #[bit(3, rw)]
    pub write_through: bool,
    #[bit(4, rw)]
    pub cache_disable: bool,
    #[bit(5, rw)]
    pub accessed: bool,
    #[bit(6, rw)]
    pub dirty: bool,
    #[bit(7, rw)]
    pub page_attribute_table: bool,
    #[bit(8, rw)]
    pub global: bool,
    #[bits(12..=31, rw)]
    pub page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user mapping of `frame`. The accessed and dirty bits start clear.
    pub fn user_page(frame: FrameNumber, writable: bool) -> Self {
        debug_assert!(frame.0 <= 0xF_FFFF, "{frame} does not fit a page table entry");
        Self::DEFAULT
            .with_present(true)
            .with_read_write(writable)
            .with_user_supervisor(true)
            .with_page_frame_address(u20::new(frame.0 as u32 & 0xF_FFFF))
    }

    pub fn frame(&self) -> FrameNumber {
        FrameNumber(self.page_frame_address().value() as usize)
    }
}
