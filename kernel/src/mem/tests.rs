use super::error::{EvictionCause, MmapFault};
use super::*;
use crate::block::block_core::{BlockDevice, BlockSector, MemoryBlock};
use crate::block::block_error::BlockError;
use crate::paging::{AddressSpace, PageMap};
use crate::swapping::SwapSlot;
use crate::threading::process::{Caller, Pid, Tid};
use crate::vfs::tempfs::TempFs;
use crate::vfs::{self, FileHandle, FileIo};
use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::result::Result;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use kidneyos_shared::mem::{FrameNumber, VirtAddr, PAGE_FRAME_SIZE, SECTORS_PER_PAGE};

const PID: Pid = 1;
const TID: Tid = 1;

fn page(n: usize) -> VirtAddr {
    VirtAddr::new((n + 1) * PAGE_FRAME_SIZE)
}

fn vm_from(memory: Box<dyn PhysicalMemory>, swap: Box<dyn BlockDevice>, files: Box<dyn FileIo>) -> Vm {
    let vm = Vm::new(memory, swap, files);
    assert!(vm
        .lock(TID)
        .unwrap()
        .register_process(PID, Box::new(PageMap::new())));
    vm
}

fn vm_with_files(frames: usize, swap_slots: u32, files: Box<dyn FileIo>) -> Vm {
    vm_from(
        Box::new(FramePool::new(frames)),
        Box::new(MemoryBlock::new("swap", swap_slots * SECTORS_PER_PAGE)),
        files,
    )
}

fn vm(frames: usize, swap_slots: u32) -> Vm {
    vm_with_files(frames, swap_slots, Box::new(TempFs::new()))
}

fn touch(guard: &mut FrameGuard, vaddr: VirtAddr) {
    guard
        .address_space_mut(PID)
        .unwrap()
        .set_accessed(vaddr, true);
}

fn read_file(guard: &mut FrameGuard, file: FileHandle, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    let n = guard.io().files.read_at(file, 0, &mut buf).unwrap();
    buf.truncate(n);
    buf
}

/// File store that counts writes.
struct CountingFiles {
    fs: TempFs,
    writes: Arc<AtomicUsize>,
}

impl FileIo for CountingFiles {
    fn read_at(&mut self, file: FileHandle, offset: u64, buf: &mut [u8]) -> vfs::Result<usize> {
        self.fs.read_at(file, offset, buf)
    }

    fn write_at(&mut self, file: FileHandle, offset: u64, buf: &[u8]) -> vfs::Result<usize> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.fs.write_at(file, offset, buf)
    }
}

/// File store that stops every write after its first byte.
struct ShortWrites(TempFs);

impl FileIo for ShortWrites {
    fn read_at(&mut self, file: FileHandle, offset: u64, buf: &mut [u8]) -> vfs::Result<usize> {
        self.0.read_at(file, offset, buf)
    }

    fn write_at(&mut self, file: FileHandle, offset: u64, buf: &[u8]) -> vfs::Result<usize> {
        self.0.write_at(file, offset, &buf[..buf.len().min(1)])
    }
}

/// File store whose device has gone away.
struct BrokenFiles;

impl FileIo for BrokenFiles {
    fn read_at(&mut self, _: FileHandle, _: u64, _: &mut [u8]) -> vfs::Result<usize> {
        Err(vfs::Error::Io)
    }

    fn write_at(&mut self, _: FileHandle, _: u64, _: &[u8]) -> vfs::Result<usize> {
        Err(vfs::Error::Io)
    }
}

/// Swap device whose reads can be made to fail.
struct FlakySwap {
    block: MemoryBlock,
    fail_reads: Arc<AtomicBool>,
}

impl BlockDevice for FlakySwap {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(BlockError::ReadError);
        }
        self.block.read(sector, buf)
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.block.write(sector, buf)
    }

    fn size(&self) -> BlockSector {
        self.block.size()
    }
}

/// Frame pool that publishes its free count and can be told to hand out nothing.
struct TrackedPool {
    pool: FramePool,
    free: Arc<AtomicUsize>,
    dry: Arc<AtomicBool>,
}

impl TrackedPool {
    fn new(frames: usize) -> (Self, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let free = Arc::new(AtomicUsize::new(frames));
        let dry = Arc::new(AtomicBool::new(false));
        let pool = Self {
            pool: FramePool::new(frames),
            free: free.clone(),
            dry: dry.clone(),
        };
        (pool, free, dry)
    }

    fn publish(&self) {
        self.free.store(self.pool.free_frames(), Ordering::Relaxed);
    }
}

impl PhysicalMemory for TrackedPool {
    fn try_allocate(&mut self, flags: AllocFlags) -> Option<FrameNumber> {
        if self.dry.load(Ordering::Relaxed) {
            return None;
        }
        let frame = self.pool.try_allocate(flags);
        self.publish();
        frame
    }

    fn free(&mut self, frame: FrameNumber) {
        self.pool.free(frame);
        self.publish();
    }

    fn frame(&self, frame: FrameNumber) -> &[u8; PAGE_FRAME_SIZE] {
        self.pool.frame(frame)
    }

    fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8; PAGE_FRAME_SIZE] {
        self.pool.frame_mut(frame)
    }
}

#[test]
fn allocations_get_distinct_frames() {
    let vm = vm(4, 4);
    let mut guard = vm.lock(TID).unwrap();

    let mut frames = Vec::new();
    for n in 0..4 {
        let frame = guard
            .allocate_frame(PID, page(n), AllocFlags::zeroed(), true)
            .unwrap();
        assert!(!frames.contains(&frame));
        frames.push(frame);
    }

    for (n, &frame) in frames.iter().enumerate() {
        let entry = guard.fte_search(PID, page(n)).unwrap();
        assert_eq!(entry.frame, frame);
        assert_eq!(
            guard.address_space_mut(PID).unwrap().translate(page(n)),
            Some(frame)
        );
        let record = guard.page(PID, page(n)).unwrap();
        assert!(record.resident && record.evictable);
        assert_eq!(record.allocated_at, n as u64 + 1);
    }
    assert_eq!(guard.resident_pages(), 4);
    assert_eq!(guard.swap_slots_in_use(), 0);
}

#[test]
fn allocation_rejects_taken_or_misaligned_addresses() {
    let vm = vm(2, 2);
    let mut guard = vm.lock(TID).unwrap();
    guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();

    assert_eq!(
        guard.allocate_frame(PID, page(0), AllocFlags::DEFAULT, true),
        Err(VmError::INSTALL_FAILURE)
    );
    assert_eq!(
        guard.allocate_frame(PID, VirtAddr::new(0x1234), AllocFlags::DEFAULT, true),
        Err(VmError::INSTALL_FAILURE)
    );
    assert_eq!(
        guard.allocate_frame(7, page(1), AllocFlags::DEFAULT, true),
        Err(VmError::Fatal(FatalError::UnknownProcess))
    );
    assert_eq!(guard.resident_pages(), 1);
}

#[test]
fn full_pool_evicts_first_unreferenced_page() {
    let vm = vm(4, 8);
    let mut guard = vm.lock(TID).unwrap();
    for n in 0..4 {
        guard
            .allocate_frame(PID, page(n), AllocFlags::zeroed(), true)
            .unwrap();
    }
    for n in 0..3 {
        touch(&mut guard, page(n));
    }
    let victim = guard.fte_search(PID, page(3)).unwrap().frame;

    let frame = guard
        .allocate_frame(PID, page(4), AllocFlags::zeroed(), true)
        .unwrap();

    assert_eq!(frame, victim);
    assert!(guard.fte_search(PID, page(3)).is_none());
    let evicted = guard.page(PID, page(3)).unwrap();
    assert!(!evicted.resident);
    assert!(evicted.swap_slot.is_some());
    for n in 0..3 {
        assert!(guard.fte_search(PID, page(n)).is_some());
        // The sweep cleared every accessed bit on its way to the victim.
        assert!(!guard
            .address_space_mut(PID)
            .unwrap()
            .is_accessed(page(n)));
    }
    assert_eq!(guard.resident_pages(), 4);
}

#[test]
fn pinned_pages_are_never_victims() {
    let vm = vm(2, 4);
    let mut guard = vm.lock(TID).unwrap();
    let pinned = guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    let other = guard
        .allocate_frame(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.pin_page(PID, page(0)).unwrap();

    assert_eq!(guard.select_victim(), Ok(other));
    assert_ne!(guard.select_victim(), Ok(pinned));

    guard.pin_page(PID, page(1)).unwrap();
    assert_eq!(
        guard.select_victim(),
        Err(VmError::eviction(EvictionCause::NoVictim))
    );
    assert_eq!(
        guard.allocate_frame(PID, page(2), AllocFlags::DEFAULT, true),
        Err(VmError::eviction(EvictionCause::NoVictim))
    );

    guard.unpin_page(PID, page(0)).unwrap();
    assert_eq!(guard.select_victim(), Ok(pinned));
}

#[test]
fn empty_frame_table_has_no_victim() {
    let vm = vm(1, 1);
    let mut guard = vm.lock(TID).unwrap();
    assert_eq!(
        guard.select_victim(),
        Err(VmError::eviction(EvictionCause::NoVictim))
    );
}

#[test]
fn swap_round_trip_frees_the_slot() {
    let vm = vm(1, 2);
    let mut guard = vm.lock(TID).unwrap();
    guard
        .allocate_frame(PID, page(0), AllocFlags::zeroed(), true)
        .unwrap();
    let contents: Vec<u8> = (0..PAGE_FRAME_SIZE).map(|i| (i % 251) as u8).collect();
    guard
        .frame_contents_mut(PID, page(0))
        .unwrap()
        .copy_from_slice(&contents);

    guard
        .allocate_frame(PID, page(1), AllocFlags::zeroed(), true)
        .unwrap();
    assert_eq!(guard.page(PID, page(0)).unwrap().swap_slot, Some(SwapSlot(0)));
    assert_eq!(guard.swap_slots_in_use(), 1);

    // Page 1 goes to swap to make room. Slot 0 is still held until page 0 is mapped again.
    guard.load_sup_pte(PID, page(0)).unwrap();
    assert_eq!(guard.frame_contents(PID, page(0)).unwrap()[..], contents[..]);
    let record = guard.page(PID, page(0)).unwrap();
    assert!(record.resident && record.evictable);
    assert_eq!(record.swap_slot, None);
    assert_eq!(guard.page(PID, page(1)).unwrap().swap_slot, Some(SwapSlot(1)));
    assert_eq!(guard.swap_slots_in_use(), 1);

    // Slot 0 is free again and page 0 lands in it on its next eviction.
    guard.load_sup_pte(PID, page(1)).unwrap();
    assert_eq!(guard.page(PID, page(0)).unwrap().swap_slot, Some(SwapSlot(0)));
    assert_eq!(guard.swap_slots_in_use(), 1);
    assert!(guard
        .frame_contents(PID, page(1))
        .unwrap()
        .iter()
        .all(|&b| b == 0));
}

#[test]
fn loading_a_resident_page_does_nothing() {
    let vm = vm(1, 1);
    let mut guard = vm.lock(TID).unwrap();
    let frame = guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.load_sup_pte(PID, page(0)).unwrap();
    guard.load_page(PID, page(0)).unwrap();
    assert_eq!(guard.fte_search(PID, page(0)).unwrap().frame, frame);
    assert_eq!(guard.resident_pages(), 1);
}

#[test]
fn pins_survive_a_load() {
    let vm = vm(2, 2);
    let mut guard = vm.lock(TID).unwrap();
    guard
        .register_page(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.pin_page(PID, page(0)).unwrap();
    guard.load_page(PID, page(0)).unwrap();
    assert!(!guard.page(PID, page(0)).unwrap().evictable);

    guard
        .register_page(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.load_page(PID, page(1)).unwrap();
    assert!(guard.page(PID, page(1)).unwrap().evictable);
}

#[test]
fn lazy_anonymous_page_loads_zeroed() {
    let vm = vm(1, 2);
    let mut guard = vm.lock(TID).unwrap();
    guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.frame_contents_mut(PID, page(0)).unwrap().fill(0xAA);
    guard
        .register_page(PID, page(1), AllocFlags::DEFAULT, false)
        .unwrap();
    assert!(guard.fte_search(PID, page(1)).is_none());

    guard.load_page(PID, page(1)).unwrap();
    assert!(guard
        .frame_contents(PID, page(1))
        .unwrap()
        .iter()
        .all(|&b| b == 0));
    assert!(!guard.address_space_mut(PID).unwrap().is_dirty(page(1)));

    guard.load_page(PID, page(0)).unwrap();
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 0xAA));
}

#[test]
fn loading_unregistered_page_is_a_process_fault() {
    let vm = vm(1, 1);
    let mut guard = vm.lock(TID).unwrap();
    let error = guard.load_page(PID, page(0)).unwrap_err();
    assert_eq!(error, VmError::Process(ProcessFault::NotRegistered));
    assert!(!error.is_fatal());
}

#[test]
fn swap_exhaustion_leaves_victim_alone() {
    let vm = vm(1, 0);
    let mut guard = vm.lock(TID).unwrap();
    let frame = guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.frame_contents_mut(PID, page(0)).unwrap().fill(0x11);

    let error = guard
        .allocate_frame(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap_err();
    assert_eq!(error, VmError::eviction(EvictionCause::SwapFull));
    assert!(error.is_fatal());

    assert_eq!(guard.fte_search(PID, page(0)).unwrap().frame, frame);
    let record = guard.page(PID, page(0)).unwrap();
    assert!(record.resident);
    assert_eq!(record.swap_slot, None);
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 0x11));
    assert!(guard.page(PID, page(1)).is_none());
    assert_eq!(guard.resident_pages(), 1);
}

#[test]
fn failed_reload_keeps_the_swap_slot() {
    let vm = vm(2, 2);
    let mut guard = vm.lock(TID).unwrap();
    let frame = guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.frame_contents_mut(PID, page(0)).unwrap().fill(0x42);
    guard.evict(frame).unwrap();
    assert_eq!(guard.swap_slots_in_use(), 1);

    // Something else got mapped at the page's address in the meantime.
    assert!(guard
        .address_space_mut(PID)
        .unwrap()
        .install(page(0), FrameNumber(9), true));
    assert_eq!(
        guard.load_sup_pte(PID, page(0)),
        Err(VmError::INSTALL_FAILURE)
    );
    let record = guard.page(PID, page(0)).unwrap();
    assert!(!record.resident);
    assert!(record.evictable);
    assert_eq!(record.swap_slot, Some(SwapSlot(0)));
    assert_eq!(guard.swap_slots_in_use(), 1);
    assert_eq!(guard.resident_pages(), 0);

    guard.address_space_mut(PID).unwrap().clear(page(0));
    guard.load_sup_pte(PID, page(0)).unwrap();
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 0x42));
    assert_eq!(guard.swap_slots_in_use(), 0);
}

#[test]
fn evicting_unknown_frame_is_fatal() {
    let vm = vm(1, 1);
    let mut guard = vm.lock(TID).unwrap();
    assert_eq!(
        guard.evict(FrameNumber(0)),
        Err(VmError::Fatal(FatalError::UnknownFrame))
    );
}

#[test]
fn dirty_mapped_page_round_trips_through_its_file() {
    let mut fs = TempFs::new();
    let data: Vec<u8> = (0..6000).map(|i| (i % 253) as u8 + 1).collect();
    let file = fs.create(&data);
    let vm = vm_with_files(1, 1, Box::new(fs));
    let mut guard = vm.lock(TID).unwrap();

    let pages = guard.map_file(PID, page(0), file, 0, data.len()).unwrap();
    assert_eq!(pages, [page(0), page(1)]);

    let tail = page(1);
    guard.load_mmap(PID, tail).unwrap();
    let contents = guard.frame_contents(PID, tail).unwrap();
    assert_eq!(contents[..1904], data[PAGE_FRAME_SIZE..]);
    assert!(contents[1904..].iter().all(|&b| b == 0));

    guard.frame_contents_mut(PID, tail).unwrap()[..4].copy_from_slice(b"kdny");
    guard.address_space_mut(PID).unwrap().set_dirty(tail, true);
    let frame = guard.fte_search(PID, tail).unwrap().frame;
    guard.evict(frame).unwrap();

    assert_eq!(guard.swap_slots_in_use(), 0);
    let record = guard.page(PID, tail).unwrap();
    assert!(!record.resident);
    assert_eq!(record.swap_slot, None);
    let on_disk = read_file(&mut guard, file, data.len());
    assert_eq!(on_disk.len(), data.len());
    assert_eq!(&on_disk[PAGE_FRAME_SIZE..PAGE_FRAME_SIZE + 4], b"kdny");
    assert_eq!(on_disk[..PAGE_FRAME_SIZE], data[..PAGE_FRAME_SIZE]);

    guard.load_page(PID, tail).unwrap();
    let contents = guard.frame_contents(PID, tail).unwrap();
    assert_eq!(&contents[..4], b"kdny");
    assert_eq!(contents[4..1904], data[PAGE_FRAME_SIZE + 4..]);
    assert!(contents[1904..].iter().all(|&b| b == 0));
}

#[test]
fn clean_mapped_page_is_dropped_without_writes() {
    let writes = Arc::new(AtomicUsize::new(0));
    let mut fs = TempFs::new();
    let file = fs.create(&[7; PAGE_FRAME_SIZE]);
    let files = CountingFiles {
        fs,
        writes: writes.clone(),
    };
    let vm = vm_with_files(1, 1, Box::new(files));
    let mut guard = vm.lock(TID).unwrap();

    let info = MmapInfo {
        file,
        length: PAGE_FRAME_SIZE,
        offset: 0,
    };
    guard.register_mmap_page(PID, page(0), info).unwrap();
    guard
        .register_page(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.load_page(PID, page(0)).unwrap();

    // Page 0 is evicted to make room for page 1.
    guard.load_page(PID, page(1)).unwrap();
    assert!(guard.fte_search(PID, page(0)).is_none());
    assert_eq!(writes.load(Ordering::Relaxed), 0);
    assert_eq!(guard.swap_slots_in_use(), 0);
    assert_eq!(guard.page(PID, page(0)).unwrap().swap_slot, None);

    guard.load_page(PID, page(0)).unwrap();
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 7));
    assert_eq!(guard.swap_slots_in_use(), 1);
}

#[test]
fn empty_or_missing_mapping_is_a_process_fault() {
    let mut fs = TempFs::new();
    let file = fs.create(b"abc");
    let vm = vm_with_files(1, 1, Box::new(fs));
    let mut guard = vm.lock(TID).unwrap();

    let empty = MmapInfo {
        file,
        length: 0,
        offset: 0,
    };
    guard.register_mmap_page(PID, page(0), empty).unwrap();
    let error = guard.load_mmap(PID, page(0)).unwrap_err();
    assert_eq!(error, VmError::invalid_mmap(MmapFault::Empty));
    assert!(!error.is_fatal());
    assert!(guard.fte_search(PID, page(0)).is_none());
    assert_eq!(guard.resident_pages(), 0);
    assert!(guard.page(PID, page(0)).unwrap().evictable);

    guard
        .register_page(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap();
    assert_eq!(
        guard.load_mmap(PID, page(1)),
        Err(VmError::invalid_mmap(MmapFault::Missing))
    );

    assert_eq!(
        guard.map_file(PID, page(4), file, 0, 0),
        Err(VmError::invalid_mmap(MmapFault::Empty))
    );
    assert_eq!(guard.resident_pages(), 0);
}

#[test]
fn short_file_reads_zero_fill() {
    let mut fs = TempFs::new();
    let file = fs.create(b"hello");
    let vm = vm_with_files(1, 1, Box::new(fs));
    let mut guard = vm.lock(TID).unwrap();

    guard
        .map_file(PID, page(0), file, 0, PAGE_FRAME_SIZE)
        .unwrap();
    guard.load_page(PID, page(0)).unwrap();
    let contents = guard.frame_contents(PID, page(0)).unwrap();
    assert_eq!(&contents[..5], b"hello");
    assert!(contents[5..].iter().all(|&b| b == 0));
}

#[test]
fn mapping_over_registered_pages_is_refused() {
    let mut fs = TempFs::new();
    let file = fs.create(&[1; 2 * PAGE_FRAME_SIZE]);
    let vm = vm_with_files(1, 1, Box::new(fs));
    let mut guard = vm.lock(TID).unwrap();

    guard
        .register_page(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap();
    assert_eq!(
        guard.map_file(PID, page(0), file, 0, 2 * PAGE_FRAME_SIZE),
        Err(VmError::INSTALL_FAILURE)
    );
    assert!(guard.page(PID, page(0)).is_none());
    assert_eq!(
        guard.register_page(PID, VirtAddr::new(0x1001), AllocFlags::DEFAULT, true),
        Err(VmError::Process(ProcessFault::Misaligned))
    );
}

#[test]
fn reentrant_lock_is_reported() {
    let vm = vm(1, 1);
    let caller = Caller::new(PID, TID);
    let guard = vm.lock(TID).unwrap();

    assert_eq!(
        vm.lock(TID).err(),
        Some(VmError::Fatal(FatalError::ReentrantLock))
    );
    assert_eq!(
        vm.allocate_frame(caller, page(0), AllocFlags::DEFAULT, true),
        Err(VmError::Fatal(FatalError::ReentrantLock))
    );

    drop(guard);
    vm.allocate_frame(caller, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    vm.load_page(caller, page(0)).unwrap();
}

#[test]
fn release_returns_frames_and_slots() {
    let mut fs = TempFs::new();
    let file = fs.create(&[0; PAGE_FRAME_SIZE]);
    let vm = vm_with_files(2, 4, Box::new(fs));
    let caller = Caller::new(PID, TID);
    let mut guard = vm.lock(TID).unwrap();

    for n in 0..3 {
        guard
            .allocate_frame(PID, page(n), AllocFlags::DEFAULT, true)
            .unwrap();
    }
    assert_eq!(guard.swap_slots_in_use(), 1);
    assert!(guard.fte_search(PID, page(0)).is_none());

    guard.release_page(PID, page(0)).unwrap();
    assert_eq!(guard.swap_slots_in_use(), 0);
    assert!(guard.page(PID, page(0)).is_none());

    guard.map_file(PID, page(8), file, 0, PAGE_FRAME_SIZE).unwrap();
    guard.load_page(PID, page(8)).unwrap();
    guard.frame_contents_mut(PID, page(8)).unwrap()[0] = 0xEE;
    guard.address_space_mut(PID).unwrap().set_dirty(page(8), true);
    drop(guard);

    vm.release_page(caller, page(8)).unwrap();
    let mut guard = vm.lock(TID).unwrap();
    assert_eq!(read_file(&mut guard, file, 1), [0xEE]);
    assert!(guard.fte_search(PID, page(8)).is_none());

    guard.release_process(PID).unwrap();
    assert_eq!(guard.resident_pages(), 0);
    assert_eq!(guard.swap_slots_in_use(), 0);
    assert!(guard.page(PID, page(1)).is_none());
    assert_eq!(
        guard.release_process(PID),
        Err(VmError::Fatal(FatalError::UnknownProcess))
    );

    assert!(guard.register_process(PID, Box::new(PageMap::new())));
    assert!(!guard.register_process(PID, Box::new(PageMap::new())));
    guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard
        .allocate_frame(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap();
    assert_eq!(guard.swap_slots_in_use(), 0);
}

#[test]
fn allocation_failure_after_eviction_is_fatal() {
    let (pool, free, dry) = TrackedPool::new(1);
    let swap = MemoryBlock::new("swap", 2 * SECTORS_PER_PAGE);
    let vm = vm_from(Box::new(pool), Box::new(swap), Box::new(TempFs::new()));
    let mut guard = vm.lock(TID).unwrap();
    guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.frame_contents_mut(PID, page(0)).unwrap().fill(0x5a);
    assert_eq!(free.load(Ordering::Relaxed), 0);

    // The victim's frame goes back to the pool but the pool keeps it.
    dry.store(true, Ordering::Relaxed);
    let error = guard
        .allocate_frame(PID, page(1), AllocFlags::DEFAULT, true)
        .unwrap_err();
    assert_eq!(error, VmError::ALLOCATION_FAILURE);
    assert!(error.is_fatal());

    assert!(guard.page(PID, page(1)).is_none());
    assert_eq!(guard.resident_pages(), 0);
    assert_eq!(free.load(Ordering::Relaxed), 1);
    let evicted = guard.page(PID, page(0)).unwrap();
    assert!(!evicted.resident);
    assert_eq!(evicted.swap_slot, Some(SwapSlot(0)));

    dry.store(false, Ordering::Relaxed);
    guard.load_page(PID, page(0)).unwrap();
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 0x5a));
    assert_eq!(free.load(Ordering::Relaxed), 0);
}

#[test]
fn swap_read_error_returns_the_frame() {
    let (pool, free, _) = TrackedPool::new(1);
    let fail_reads = Arc::new(AtomicBool::new(false));
    let swap = FlakySwap {
        block: MemoryBlock::new("swap", 2 * SECTORS_PER_PAGE),
        fail_reads: fail_reads.clone(),
    };
    let vm = vm_from(Box::new(pool), Box::new(swap), Box::new(TempFs::new()));
    let mut guard = vm.lock(TID).unwrap();
    let frame = guard
        .allocate_frame(PID, page(0), AllocFlags::DEFAULT, true)
        .unwrap();
    guard.frame_contents_mut(PID, page(0)).unwrap().fill(0x42);
    guard.evict(frame).unwrap();
    assert_eq!(free.load(Ordering::Relaxed), 1);

    fail_reads.store(true, Ordering::Relaxed);
    assert_eq!(
        guard.load_sup_pte(PID, page(0)),
        Err(VmError::Fatal(FatalError::SwapIo(BlockError::ReadError)))
    );
    assert_eq!(guard.resident_pages(), 0);
    assert_eq!(free.load(Ordering::Relaxed), 1);
    let record = guard.page(PID, page(0)).unwrap();
    assert!(!record.resident);
    assert!(record.evictable);
    assert_eq!(record.swap_slot, Some(SwapSlot(0)));
    assert_eq!(guard.swap_slots_in_use(), 1);

    fail_reads.store(false, Ordering::Relaxed);
    guard.load_sup_pte(PID, page(0)).unwrap();
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 0x42));
    assert_eq!(guard.swap_slots_in_use(), 0);
}

#[test]
fn mapped_file_read_error_returns_the_frame() {
    let (pool, free, _) = TrackedPool::new(1);
    let swap = MemoryBlock::new("swap", SECTORS_PER_PAGE);
    let vm = vm_from(Box::new(pool), Box::new(swap), Box::new(BrokenFiles));
    let mut guard = vm.lock(TID).unwrap();
    let file = FileHandle {
        inode: 5,
        fs_data: 0,
    };
    guard.map_file(PID, page(0), file, 0, 10).unwrap();

    assert_eq!(
        guard.load_mmap(PID, page(0)),
        Err(VmError::Fatal(FatalError::FileIo(vfs::Error::Io)))
    );
    assert_eq!(guard.resident_pages(), 0);
    assert_eq!(free.load(Ordering::Relaxed), 1);
    let record = guard.page(PID, page(0)).unwrap();
    assert!(!record.resident);
    assert!(record.evictable);
    assert!(guard.fte_search(PID, page(0)).is_none());
}

#[test]
fn short_write_back_keeps_the_page_resident() {
    let mut fs = TempFs::new();
    let file = fs.create(&[0; PAGE_FRAME_SIZE]);
    let vm = vm_with_files(1, 1, Box::new(ShortWrites(fs)));
    let mut guard = vm.lock(TID).unwrap();
    guard
        .map_file(PID, page(0), file, 0, PAGE_FRAME_SIZE)
        .unwrap();
    guard.load_mmap(PID, page(0)).unwrap();
    guard.frame_contents_mut(PID, page(0)).unwrap().fill(0x77);
    guard.address_space_mut(PID).unwrap().set_dirty(page(0), true);
    let frame = guard.fte_search(PID, page(0)).unwrap().frame;

    let short = VmError::Fatal(FatalError::FileIo(vfs::Error::Io));
    assert_eq!(guard.evict(frame), Err(short));
    assert_eq!(guard.fte_search(PID, page(0)).unwrap().frame, frame);
    assert!(guard.page(PID, page(0)).unwrap().resident);
    assert!(guard
        .frame_contents(PID, page(0))
        .unwrap()
        .iter()
        .all(|&b| b == 0x77));

    assert_eq!(guard.release_page(PID, page(0)), Err(short));
    assert!(guard.page(PID, page(0)).is_some());
    assert_eq!(guard.resident_pages(), 1);
}

#[test]
fn overflowing_file_offset_is_refused() {
    let mut fs = TempFs::new();
    let file = fs.create(b"abc");
    let vm = vm_with_files(1, 1, Box::new(fs));
    let mut guard = vm.lock(TID).unwrap();

    assert_eq!(
        guard.map_file(PID, page(0), file, u64::MAX - 10, 2 * PAGE_FRAME_SIZE),
        Err(VmError::INSTALL_FAILURE)
    );
    assert!(guard.page(PID, page(0)).is_none());
    assert!(guard.page(PID, page(1)).is_none());
    guard
        .map_file(PID, page(0), file, 0, 2 * PAGE_FRAME_SIZE)
        .unwrap();
}
