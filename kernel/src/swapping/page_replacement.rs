/// The state of a resident frame as seen by the replacement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// The page is pinned and must not be evicted.
    Pinned,
    /// The page was accessed since the policy last cleared its accessed bit.
    Referenced,
    /// The page has not been accessed since the policy last looked at it.
    Unreferenced,
}

/// Resident frames in ring order, as seen by a replacement policy.
pub trait ReferenceBits {
    fn reference(&self, index: usize) -> Reference;
    fn clear_reference(&mut self, index: usize);
}

pub trait PageReplacementPolicy {
    /// Choose a victim among the `len` frames of `frames`, returning its ring index.
    ///
    /// Returns `None` if no frame can be evicted.
    fn select_victim(&mut self, frames: &mut dyn ReferenceBits, len: usize) -> Option<usize>;

    /// The frame at ring index `index` was removed, leaving `remaining` frames.
    fn frame_removed(&mut self, index: usize, remaining: usize);
}

/// Second-chance (clock) replacement.
///
/// The hand sweeps the ring, clearing accessed bits as it goes; the first unpinned frame found
/// with its bit already clear is the victim. Two full sweeps are always enough when any frame is
/// unpinned, since the first one clears every bit.
#[derive(Debug, Default)]
pub struct ClockEviction {
    hand: usize,
}

impl ClockEviction {
    pub const fn new() -> Self {
        Self { hand: 0 }
    }

    pub fn hand(&self) -> usize {
        self.hand
    }
}

impl PageReplacementPolicy for ClockEviction {
    fn select_victim(&mut self, frames: &mut dyn ReferenceBits, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        if self.hand >= len {
            self.hand = 0;
        }

        for _ in 0..2 * len {
            let index = self.hand;
            match frames.reference(index) {
                // The hand stays on the victim; removing it leaves the hand on its successor.
                Reference::Unreferenced => return Some(index),
                Reference::Referenced => frames.clear_reference(index),
                Reference::Pinned => {}
            }
            self.hand = (self.hand + 1) % len;
        }

        None
    }

    fn frame_removed(&mut self, index: usize, remaining: usize) {
        if index < self.hand {
            self.hand -= 1;
        }
        if self.hand >= remaining {
            self.hand = 0;
        }
    }
}
