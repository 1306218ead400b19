mod placement_algorithms;

pub use placement_algorithms::{FirstFit, NextFit, PlacementAlgorithm};

use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use kidneyos_shared::mem::{FrameNumber, PAGE_FRAME_SIZE};

/// Hints passed through to the physical allocator.
#[bitfield(u8, default = 0)]
pub struct AllocFlags {
    /// Zero the frame before handing it out.
    #[bit(0, rw)]
    pub zero: bool,
    /// Take the frame from the user pool.
    #[bit(1, rw)]
    pub user: bool,
}

impl AllocFlags {
    pub fn zeroed() -> Self {
        Self::DEFAULT.with_zero(true)
    }
}

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    pub user: bool,
}

/// The physical frame provider.
pub trait PhysicalMemory: Send {
    /// Take a free frame, or `None` if every frame is in use.
    fn try_allocate(&mut self, flags: AllocFlags) -> Option<FrameNumber>;
    /// Return `frame` to the free pool.
    fn free(&mut self, frame: FrameNumber);
    fn frame(&self, frame: FrameNumber) -> &[u8; PAGE_FRAME_SIZE];
    fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8; PAGE_FRAME_SIZE];
}

/// A fixed pool of page frames tracked by a core map.
pub struct FramePool<P = NextFit> {
    core_map: Box<[CoreMapEntry]>,
    frames: Box<[[u8; PAGE_FRAME_SIZE]]>,
    placement: P,
    frames_allocated: usize,
}

impl FramePool<NextFit> {
    pub fn new(frames: usize) -> Self {
        Self::with_placement(frames, NextFit::default())
    }
}

impl<P: PlacementAlgorithm> FramePool<P> {
    pub fn with_placement(frames: usize, placement: P) -> Self {
        Self {
            core_map: vec![CoreMapEntry::DEFAULT; frames].into_boxed_slice(),
            frames: vec![[0; PAGE_FRAME_SIZE]; frames].into_boxed_slice(),
            placement,
            frames_allocated: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.core_map.len()
    }

    pub fn free_frames(&self) -> usize {
        self.capacity() - self.frames_allocated
    }

    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        self.core_map
            .get(frame.0)
            .is_some_and(|entry| entry.allocated())
    }
}

impl<P: PlacementAlgorithm + Send> PhysicalMemory for FramePool<P> {
    fn try_allocate(&mut self, flags: AllocFlags) -> Option<FrameNumber> {
        if self.frames_allocated == self.capacity() {
            return None;
        }

        let index = self.placement.place(&self.core_map)?;
        assert!(!self.core_map[index].allocated());
        self.core_map[index] = self.core_map[index]
            .with_allocated(true)
            .with_user(flags.user());
        self.frames_allocated += 1;

        if flags.zero() {
            self.frames[index].fill(0);
        }
        Some(FrameNumber(index))
    }

    fn free(&mut self, frame: FrameNumber) {
        assert!(
            self.is_allocated(frame),
            "freeing {frame}, which is not allocated"
        );
        self.core_map[frame.0] = CoreMapEntry::DEFAULT;
        self.frames_allocated -= 1;
    }

    fn frame(&self, frame: FrameNumber) -> &[u8; PAGE_FRAME_SIZE] {
        &self.frames[frame.0]
    }

    fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8; PAGE_FRAME_SIZE] {
        &mut self.frames[frame.0]
    }
}
