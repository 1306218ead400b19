use super::{OFFSET, PAGE_FRAME_SIZE};
use core::fmt;

/// A user virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_FRAME_SIZE == 0
    }

    /// Round down to the start of the containing page.
    pub const fn page_round_down(self) -> Self {
        Self(self.0 & !(PAGE_FRAME_SIZE - 1))
    }

    pub const fn page_number(self) -> usize {
        self.0 / PAGE_FRAME_SIZE
    }

    pub const fn is_user(self) -> bool {
        self.0 < OFFSET
    }

    /// Address `pages` pages after this one, or `None` on overflow.
    pub const fn checked_add_pages(self, pages: usize) -> Option<Self> {
        let Some(bytes) = pages.checked_mul(PAGE_FRAME_SIZE) else {
            return None;
        };
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#X})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

/// Index of a physical page frame within the user frame pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub usize);

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}
