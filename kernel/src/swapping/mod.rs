pub mod page_replacement;
pub mod swap_space;

pub use page_replacement::{ClockEviction, PageReplacementPolicy, Reference};
pub use swap_space::SwapSpace;

use core::fmt;
use kidneyos_shared::mem::SECTORS_PER_PAGE;
use kidneyos_shared::sizes::SWAP_SECTORS;

/// How many slots, starting from slot 0, eviction searches for a free swap slot.
///
/// This is the size of the standard swap partition; smaller devices are searched in full.
pub const SWAP_SCAN_SLOTS: usize = (SWAP_SECTORS / SECTORS_PER_PAGE) as usize;

/// Index of a page-sized slot on the swap device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(pub usize);

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swap slot {}", self.0)
    }
}
