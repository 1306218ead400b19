//! Implementation of some common frame placement policies.

use super::CoreMapEntry;

/// A placement algorithm for choosing which free frame to hand out next.
pub trait PlacementAlgorithm: Default {
    /// Returns the number of a free frame, or `None` if every frame is allocated.
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize>;
}

#[derive(Default)]
pub struct NextFit {
    /// The next frame number to start searching for free frames.
    position: usize,
}

// No internal data. Declared as a zero-sized type.
#[derive(Default)]
pub struct FirstFit;

impl PlacementAlgorithm for NextFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        let total_frames = core_map.len();
        if total_frames == 0 {
            return None;
        }

        // Search from `position` to the end, then wrap around to where we started.
        let found = (0..total_frames)
            .map(|i| (self.position + i) % total_frames)
            .find(|&i| !core_map[i].allocated())?;

        self.position = (found + 1) % total_frames;
        Some(found)
    }
}

impl PlacementAlgorithm for FirstFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        core_map.iter().position(|entry| !entry.allocated())
    }
}
