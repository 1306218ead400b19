//! The virtual memory core: frame allocation, demand paging from swap and from mapped files,
//! and clock eviction over every resident user frame.
//!
//! All bookkeeping sits behind one lock, the frame lock. [`Vm::lock`] hands out a
//! [`FrameGuard`], and every operation is a method on that guard, so nothing in here takes the
//! frame lock twice. Swap and file I/O go through a second lock that is only reachable from a
//! [`FrameGuard`], so it is always taken after the frame lock.

use super::error::{EvictionCause, FatalError, MmapFault, ProcessFault, Result, VmError};
use super::frame_allocator::{AllocFlags, PhysicalMemory};
use super::frame_table::{FrameTable, FrameTableEntry};
use super::mmap::{MmapInfo, MmapRegions, MmapTable};
use super::sup_page_table::{PageArena, PageId, SupPageTable, SupPte};
use crate::block::block_core::BlockDevice;
use crate::paging::AddressSpace;
use crate::swapping::page_replacement::ReferenceBits;
use crate::swapping::{ClockEviction, PageReplacementPolicy, Reference, SwapSpace};
use crate::sync::mutex::{Mutex, MutexGuard, TicketMutex, TicketMutexGuard};
use crate::threading::process::{Caller, Pid, Tid};
use crate::vfs::{self, FileHandle, FileIo};
use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use kidneyos_shared::{
    eprintln,
    mem::{FrameNumber, VirtAddr, PAGE_FRAME_SIZE},
};

/// Per-process state: the hardware mappings, the mmap backing records and the page metadata.
struct ProcessMemory {
    page_dir: Box<dyn AddressSpace>,
    mmaps: MmapTable,
    pages: SupPageTable,
}

struct VmState {
    memory: Box<dyn PhysicalMemory>,
    frames: FrameTable,
    records: PageArena,
    processes: BTreeMap<Pid, ProcessMemory>,
    policy: ClockEviction,
    ticks: u64,
}

/// Backing stores, guarded by the I/O lock.
pub struct VmIo {
    pub swap: SwapSpace,
    pub files: Box<dyn FileIo>,
}

pub struct Vm {
    state: Mutex<VmState>,
    io: TicketMutex<VmIo>,
}

/// Holding this means holding the frame lock.
pub struct FrameGuard<'a> {
    state: MutexGuard<'a, VmState>,
    io: &'a TicketMutex<VmIo>,
}

impl Vm {
    pub fn new(
        memory: Box<dyn PhysicalMemory>,
        swap_device: Box<dyn BlockDevice>,
        files: Box<dyn FileIo>,
    ) -> Self {
        Self {
            state: Mutex::new(VmState {
                memory,
                frames: FrameTable::new(),
                records: PageArena::new(),
                processes: BTreeMap::new(),
                policy: ClockEviction::new(),
                ticks: 0,
            }),
            io: TicketMutex::new(VmIo {
                swap: SwapSpace::new(swap_device),
                files,
            }),
        }
    }

    /// Acquire the frame lock for thread `tid`.
    ///
    /// Fails with [`FatalError::ReentrantLock`] if `tid` already holds it.
    pub fn lock(&self, tid: Tid) -> Result<FrameGuard<'_>> {
        let state = self.state.lock(tid).map_err(|error| {
            eprintln!("{error}");
            VmError::from(error)
        })?;
        Ok(FrameGuard { state, io: &self.io })
    }

    pub fn allocate_frame(
        &self,
        caller: Caller,
        vaddr: VirtAddr,
        flags: AllocFlags,
        writable: bool,
    ) -> Result<FrameNumber> {
        self.lock(caller.tid)?
            .allocate_frame(caller.pid, vaddr, flags, writable)
    }

    pub fn load_page(&self, caller: Caller, vaddr: VirtAddr) -> Result<()> {
        self.lock(caller.tid)?.load_page(caller.pid, vaddr)
    }

    pub fn load_sup_pte(&self, caller: Caller, vaddr: VirtAddr) -> Result<()> {
        self.lock(caller.tid)?.load_sup_pte(caller.pid, vaddr)
    }

    pub fn load_mmap(&self, caller: Caller, vaddr: VirtAddr) -> Result<()> {
        self.lock(caller.tid)?.load_mmap(caller.pid, vaddr)
    }

    pub fn release_page(&self, caller: Caller, vaddr: VirtAddr) -> Result<()> {
        self.lock(caller.tid)?.release_page(caller.pid, vaddr)
    }
}

impl FrameGuard<'_> {
    /// Give `vaddr` in process `pid` a fresh frame right away, evicting another page if memory
    /// is full. The new page is immediately evictable.
    pub fn allocate_frame(
        &mut self,
        pid: Pid,
        vaddr: VirtAddr,
        flags: AllocFlags,
        writable: bool,
    ) -> Result<FrameNumber> {
        self.state.allocate_frame(self.io, pid, vaddr, flags, writable)
    }

    /// Make a registered page resident, from its file if it is mmap backed and from swap (or
    /// zeroes) otherwise.
    pub fn load_page(&mut self, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        let page = self.state.lookup(pid, vaddr)?;
        if self.state.records.get(page).is_mmap {
            self.state.load_pinned(self.io, page, VmState::load_from_file)
        } else {
            self.state.load_pinned(self.io, page, VmState::load_from_swap)
        }
    }

    /// Bring a swapped out page back in. A page that was never written out is zero-filled.
    pub fn load_sup_pte(&mut self, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        let page = self.state.lookup(pid, vaddr)?;
        if self.state.records.get(page).is_mmap {
            // Its content is in the file, never on swap.
            return self.state.load_pinned(self.io, page, VmState::load_from_file);
        }
        self.state.load_pinned(self.io, page, VmState::load_from_swap)
    }

    /// Bring a page of a memory-mapped file in from the file.
    pub fn load_mmap(&mut self, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        let page = self.state.lookup(pid, vaddr)?;
        self.state.load_pinned(self.io, page, VmState::load_from_file)
    }

    /// Run the replacement policy without evicting anything.
    pub fn select_victim(&mut self) -> Result<FrameNumber> {
        self.state.select_victim()
    }

    pub fn evict(&mut self, frame: FrameNumber) -> Result<()> {
        self.state.evict(self.io, frame)
    }

    /// The frame table entry backing `vaddr` in process `pid`, if the page is resident.
    pub fn fte_search(&self, pid: Pid, vaddr: VirtAddr) -> Option<FrameTableEntry> {
        self.state.frames.search(pid, vaddr.page_round_down()).copied()
    }

    /// Returns `false` if `pid` is already registered.
    #[must_use]
    pub fn register_process(&mut self, pid: Pid, page_dir: Box<dyn AddressSpace>) -> bool {
        if self.state.processes.contains_key(&pid) {
            return false;
        }
        self.state.processes.insert(
            pid,
            ProcessMemory {
                page_dir,
                mmaps: MmapTable::new(),
                pages: SupPageTable::new(),
            },
        );
        true
    }

    /// Register an anonymous page that gets its frame on first fault.
    pub fn register_page(
        &mut self,
        pid: Pid,
        vaddr: VirtAddr,
        flags: AllocFlags,
        writable: bool,
    ) -> Result<()> {
        self.state
            .register(pid, SupPte::lazy(pid, vaddr, flags, writable), None)
    }

    /// Register one page of a memory-mapped file. It is read in on first fault.
    pub fn register_mmap_page(&mut self, pid: Pid, vaddr: VirtAddr, info: MmapInfo) -> Result<()> {
        let mut record = SupPte::lazy(pid, vaddr, AllocFlags::DEFAULT.with_user(true), true);
        record.is_mmap = true;
        self.state.register(pid, record, Some(info))
    }

    /// Map `length` bytes of `file` from `offset` at `start`, one lazily loaded page at a time.
    pub fn map_file(
        &mut self,
        pid: Pid,
        start: VirtAddr,
        file: FileHandle,
        offset: u64,
        length: usize,
    ) -> Result<Vec<VirtAddr>> {
        self.state.map_file(pid, start, file, offset, length)
    }

    /// Keep the page resident until [`FrameGuard::unpin_page`].
    pub fn pin_page(&mut self, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        self.state.set_evictable(pid, vaddr, false)
    }

    pub fn unpin_page(&mut self, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        self.state.set_evictable(pid, vaddr, true)
    }

    /// Forget a page: write back a dirty mapped file page, then free its frame, its swap slot
    /// and its record.
    pub fn release_page(&mut self, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        self.state.release_page(self.io, pid, vaddr)
    }

    /// Release every page of `pid` and drop its address space.
    pub fn release_process(&mut self, pid: Pid) -> Result<()> {
        let vaddrs: Vec<VirtAddr> = self
            .state
            .processes
            .get(&pid)
            .ok_or(FatalError::UnknownProcess)?
            .pages
            .vaddrs()
            .collect();
        for vaddr in vaddrs {
            self.state.release_page(self.io, pid, vaddr)?;
        }
        self.state.processes.remove(&pid);
        Ok(())
    }

    /// A copy of the page's metadata record.
    pub fn page(&self, pid: Pid, vaddr: VirtAddr) -> Option<SupPte> {
        let page = self.state.lookup(pid, vaddr).ok()?;
        Some(*self.state.records.get(page))
    }

    pub fn resident_pages(&self) -> usize {
        self.state.frames.len()
    }

    /// Resident frames in clock order.
    pub fn frames(&self) -> impl Iterator<Item = &FrameTableEntry> {
        self.state.frames.iter()
    }

    /// The hardware mappings of `pid`. The fault handler and tests use this to see and set the
    /// accessed and dirty bits.
    pub fn address_space_mut(&mut self, pid: Pid) -> Option<&mut dyn AddressSpace> {
        let process = self.state.processes.get_mut(&pid)?;
        Some(&mut *process.page_dir)
    }

    pub fn frame_contents(&self, pid: Pid, vaddr: VirtAddr) -> Option<&[u8; PAGE_FRAME_SIZE]> {
        let entry = self.fte_search(pid, vaddr)?;
        Some(self.state.memory.frame(entry.frame))
    }

    pub fn frame_contents_mut(
        &mut self,
        pid: Pid,
        vaddr: VirtAddr,
    ) -> Option<&mut [u8; PAGE_FRAME_SIZE]> {
        let entry = self.fte_search(pid, vaddr)?;
        Some(self.state.memory.frame_mut(entry.frame))
    }

    /// Take the I/O lock. Only reachable while holding the frame lock.
    pub fn io(&mut self) -> TicketMutexGuard<'_, VmIo> {
        self.io.lock()
    }

    pub fn swap_slots_in_use(&mut self) -> usize {
        self.io().swap.slots_in_use()
    }
}

type Loader = fn(&mut VmState, &TicketMutex<VmIo>, PageId) -> Result<()>;

impl VmState {
    fn lookup(&self, pid: Pid, vaddr: VirtAddr) -> Result<PageId> {
        let process = self
            .processes
            .get(&pid)
            .ok_or(FatalError::UnknownProcess)?;
        process
            .pages
            .get(vaddr.page_round_down())
            .ok_or(VmError::from(ProcessFault::NotRegistered))
    }

    fn allocate_frame(
        &mut self,
        io: &TicketMutex<VmIo>,
        pid: Pid,
        vaddr: VirtAddr,
        flags: AllocFlags,
        writable: bool,
    ) -> Result<FrameNumber> {
        let process = self
            .processes
            .get(&pid)
            .ok_or(FatalError::UnknownProcess)?;
        if !vaddr.is_page_aligned() || process.pages.contains(vaddr) {
            eprintln!("Installation of page failed in allocate_frame: {vaddr:?} is misaligned or taken");
            return Err(VmError::INSTALL_FAILURE);
        }

        let frame = self.obtain_frame(io, flags)?;
        if !self.install(pid, vaddr, frame, writable) {
            self.memory.free(frame);
            eprintln!("Installation of page failed in allocate_frame");
            return Err(VmError::INSTALL_FAILURE);
        }

        self.ticks += 1;
        let page = self.records.insert(SupPte {
            resident: true,
            allocated_at: self.ticks,
            ..SupPte::lazy(pid, vaddr, flags, writable)
        });
        if let Some(process) = self.processes.get_mut(&pid) {
            let inserted = process.pages.insert(vaddr, page);
            debug_assert!(inserted);
        }
        self.frames.push(FrameTableEntry {
            owner: pid,
            frame,
            page,
            vaddr,
        });
        Ok(frame)
    }

    /// Take a free frame, evicting one page first if there is none.
    fn obtain_frame(&mut self, io: &TicketMutex<VmIo>, flags: AllocFlags) -> Result<FrameNumber> {
        if let Some(frame) = self.memory.try_allocate(flags) {
            return Ok(frame);
        }

        let victim = self.select_victim()?;
        self.evict(io, victim).inspect_err(|error| {
            eprintln!("Eviction failed: {error}");
        })?;

        self.memory.try_allocate(flags).ok_or_else(|| {
            eprintln!("Allocation after eviction failed");
            VmError::ALLOCATION_FAILURE
        })
    }

    fn install(&mut self, pid: Pid, vaddr: VirtAddr, frame: FrameNumber, writable: bool) -> bool {
        self.processes
            .get_mut(&pid)
            .is_some_and(|process| process.page_dir.install(vaddr, frame, writable))
    }

    /// Run `load` with the page pinned, then put its evictability back the way it was.
    fn load_pinned(&mut self, io: &TicketMutex<VmIo>, page: PageId, load: Loader) -> Result<()> {
        let record = self.records.get_mut(page);
        let evictable = record.evictable;
        record.evictable = false;
        let result = load(self, io, page);
        self.records.get_mut(page).evictable = evictable;
        result
    }

    fn load_from_swap(&mut self, io: &TicketMutex<VmIo>, page: PageId) -> Result<()> {
        let record = *self.records.get(page);
        if record.resident {
            return Ok(());
        }

        let frame = self.obtain_frame(io, record.flags)?;
        match record.swap_slot {
            Some(slot) => {
                let read = io.lock().swap.read_block(slot, self.memory.frame_mut(frame));
                if let Err(error) = read {
                    self.memory.free(frame);
                    eprintln!("Reading {slot} failed: {error}");
                    return Err(error.into());
                }
            }
            None => self.memory.frame_mut(frame).fill(0),
        }

        if !self.install(record.owner, record.vaddr, frame, record.writable) {
            self.memory.free(frame);
            eprintln!("Installation of page failed in load_sup_pte");
            return Err(VmError::INSTALL_FAILURE);
        }
        if let Some(slot) = record.swap_slot {
            io.lock().swap.reset(slot);
        }

        self.mark_resident(page, frame);
        Ok(())
    }

    fn load_from_file(&mut self, io: &TicketMutex<VmIo>, page: PageId) -> Result<()> {
        let record = *self.records.get(page);
        if record.resident {
            return Ok(());
        }

        let info = self
            .processes
            .get(&record.owner)
            .ok_or(FatalError::UnknownProcess)?
            .mmaps
            .find(record.vaddr)
            .ok_or(VmError::invalid_mmap(MmapFault::Missing))?;
        check_mmap_length(&info)?;

        let frame = self.obtain_frame(io, record.flags.with_zero(true))?;
        let buf = self.memory.frame_mut(frame);
        let read = io
            .lock()
            .files
            .read_at(info.file, info.offset, &mut buf[..info.length]);
        match read {
            Ok(n) => buf[n.min(info.length)..].fill(0),
            Err(error) => {
                self.memory.free(frame);
                eprintln!("Reading mapped file failed: {error}");
                return Err(error.into());
            }
        }

        if !self.install(record.owner, record.vaddr, frame, true) {
            self.memory.free(frame);
            eprintln!("Installation of page failed in load_mmap");
            return Err(VmError::INSTALL_FAILURE);
        }

        self.mark_resident(page, frame);
        Ok(())
    }

    fn mark_resident(&mut self, page: PageId, frame: FrameNumber) {
        let record = self.records.get_mut(page);
        record.swap_slot = None;
        record.resident = true;
        self.frames.push(FrameTableEntry {
            owner: record.owner,
            frame,
            page,
            vaddr: record.vaddr,
        });
    }

    fn select_victim(&mut self) -> Result<FrameNumber> {
        let len = self.frames.len();
        let mut bits = ResidentBits {
            frames: &self.frames,
            records: &self.records,
            processes: &mut self.processes,
        };
        let index = self.policy.select_victim(&mut bits, len).ok_or_else(|| {
            eprintln!("Eviction failed: no evictable frame among {len}");
            VmError::eviction(EvictionCause::NoVictim)
        })?;
        self.frames
            .get(index)
            .map(|entry| entry.frame)
            .ok_or(VmError::Fatal(FatalError::UnknownFrame))
    }

    /// Write the page in `frame` to its backing store and take the frame away from it.
    ///
    /// Nothing is changed if the content cannot be saved.
    fn evict(&mut self, io: &TicketMutex<VmIo>, frame: FrameNumber) -> Result<()> {
        let index = self.frames.position(frame).ok_or_else(|| {
            eprintln!("Eviction failed: {frame} is not in the frame table");
            VmError::Fatal(FatalError::UnknownFrame)
        })?;
        let Some(&entry) = self.frames.get(index) else {
            return Err(FatalError::UnknownFrame.into());
        };
        let record = *self.records.get(entry.page);
        let process = self
            .processes
            .get_mut(&entry.owner)
            .ok_or(FatalError::UnknownProcess)?;

        if record.is_mmap {
            // A clean page can be read from the file again.
            if process.page_dir.is_dirty(entry.vaddr) {
                let info = mmap_backing(&process.mmaps, entry.vaddr)?;
                write_back(&mut *io.lock().files, &info, self.memory.frame(frame))?;
            }
        } else {
            let mut io = io.lock();
            let slot = io
                .swap
                .scan_free(io.swap.scan_range())
                .ok_or_else(|| {
                    eprintln!("No space in swap!");
                    VmError::eviction(EvictionCause::SwapFull)
                })?;
            io.swap
                .write_block(slot, self.memory.frame(frame))
                .inspect_err(|error| eprintln!("Writing {slot} failed: {error}"))?;
            io.swap.mark_used(slot);
            self.records.get_mut(entry.page).swap_slot = Some(slot);
        }

        process.page_dir.clear(entry.vaddr);
        self.memory.free(frame);
        self.remove_entry(index);
        self.records.get_mut(entry.page).resident = false;
        Ok(())
    }

    fn remove_entry(&mut self, index: usize) -> FrameTableEntry {
        let entry = self.frames.remove(index);
        self.policy.frame_removed(index, self.frames.len());
        entry
    }

    fn register(&mut self, pid: Pid, record: SupPte, mmap: Option<MmapInfo>) -> Result<()> {
        let vaddr = record.vaddr;
        if !vaddr.is_page_aligned() {
            return Err(ProcessFault::Misaligned.into());
        }
        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(FatalError::UnknownProcess)?;
        if process.pages.contains(vaddr) {
            eprintln!("Page {vaddr:?} of process {pid} is already registered");
            return Err(VmError::INSTALL_FAILURE);
        }
        if let Some(info) = mmap {
            // The length is checked when the page is loaded.
            if !process.mmaps.insert(vaddr, info) {
                return Err(VmError::INSTALL_FAILURE);
            }
        }

        let page = self.records.insert(record);
        let inserted = process.pages.insert(vaddr, page);
        debug_assert!(inserted);
        Ok(())
    }

    fn map_file(
        &mut self,
        pid: Pid,
        start: VirtAddr,
        file: FileHandle,
        offset: u64,
        length: usize,
    ) -> Result<Vec<VirtAddr>> {
        if length == 0 {
            return Err(VmError::invalid_mmap(MmapFault::Empty));
        }
        if !start.is_page_aligned() {
            return Err(ProcessFault::Misaligned.into());
        }
        let process = self
            .processes
            .get_mut(&pid)
            .ok_or(FatalError::UnknownProcess)?;
        let pages = length.div_ceil(PAGE_FRAME_SIZE);
        let taken = (0..pages).any(|page| {
            start
                .checked_add_pages(page)
                .map_or(true, |vaddr| process.pages.contains(vaddr))
        });
        if taken {
            return Err(VmError::INSTALL_FAILURE);
        }
        let mapped = process
            .mmaps
            .map_region(start, file, offset, length)
            .ok_or(VmError::INSTALL_FAILURE)?;

        for &vaddr in &mapped {
            let mut record = SupPte::lazy(pid, vaddr, AllocFlags::DEFAULT.with_user(true), true);
            record.is_mmap = true;
            let page = self.records.insert(record);
            let inserted = process.pages.insert(vaddr, page);
            debug_assert!(inserted);
        }
        Ok(mapped)
    }

    fn set_evictable(&mut self, pid: Pid, vaddr: VirtAddr, evictable: bool) -> Result<()> {
        let page = self.lookup(pid, vaddr)?;
        self.records.get_mut(page).evictable = evictable;
        Ok(())
    }

    fn release_page(&mut self, io: &TicketMutex<VmIo>, pid: Pid, vaddr: VirtAddr) -> Result<()> {
        let vaddr = vaddr.page_round_down();
        let page = self.lookup(pid, vaddr)?;
        let record = *self.records.get(page);

        if let Some(entry) = self.frames.search(pid, vaddr).copied() {
            let index = self
                .frames
                .position(entry.frame)
                .ok_or(FatalError::UnknownFrame)?;
            let process = self
                .processes
                .get_mut(&pid)
                .ok_or(FatalError::UnknownProcess)?;
            if record.is_mmap && process.page_dir.is_dirty(vaddr) {
                let info = mmap_backing(&process.mmaps, vaddr)?;
                write_back(&mut *io.lock().files, &info, self.memory.frame(entry.frame))?;
            }
            process.page_dir.clear(vaddr);
            self.memory.free(entry.frame);
            self.remove_entry(index);
        }

        if let Some(slot) = record.swap_slot {
            io.lock().swap.reset(slot);
        }
        if let Some(process) = self.processes.get_mut(&pid) {
            process.pages.remove(vaddr);
            process.mmaps.remove(vaddr);
        }
        self.records.remove(page);
        Ok(())
    }
}

fn check_mmap_length(info: &MmapInfo) -> Result<()> {
    if info.length == 0 {
        eprintln!("Mapped page has no backing bytes");
        return Err(VmError::invalid_mmap(MmapFault::Empty));
    }
    if info.length > PAGE_FRAME_SIZE {
        return Err(VmError::invalid_mmap(MmapFault::Oversized));
    }
    Ok(())
}

/// The file range behind a dirty mapped page. Without one the page cannot be saved.
fn mmap_backing(mmaps: &MmapTable, vaddr: VirtAddr) -> Result<MmapInfo> {
    mmaps.find(vaddr).ok_or_else(|| {
        eprintln!("Dirty mapped page {vaddr:?} has no file backing");
        VmError::invalid_mmap(MmapFault::Missing)
    })
}

/// Write a dirty mapped page back to its file. A short write counts as a failure.
fn write_back(files: &mut dyn FileIo, info: &MmapInfo, page: &[u8; PAGE_FRAME_SIZE]) -> Result<()> {
    let len = info.length.min(PAGE_FRAME_SIZE);
    let written = files
        .write_at(info.file, info.offset, &page[..len])
        .inspect_err(|error| eprintln!("Writing back mapped page failed: {error}"))?;
    if written < len {
        eprintln!("Writing back mapped page stopped after {written} of {len} bytes");
        return Err(FatalError::FileIo(vfs::Error::Io).into());
    }
    Ok(())
}

/// The frame table as the replacement policy sees it. Accessed bits come from the owner's page
/// directory.
struct ResidentBits<'a> {
    frames: &'a FrameTable,
    records: &'a PageArena,
    processes: &'a mut BTreeMap<Pid, ProcessMemory>,
}

impl ReferenceBits for ResidentBits<'_> {
    fn reference(&self, index: usize) -> Reference {
        let Some(entry) = self.frames.get(index) else {
            return Reference::Pinned;
        };
        if !self.records.get(entry.page).evictable {
            return Reference::Pinned;
        }
        match self.processes.get(&entry.owner) {
            Some(process) if process.page_dir.is_accessed(entry.vaddr) => Reference::Referenced,
            Some(_) => Reference::Unreferenced,
            None => Reference::Pinned,
        }
    }

    fn clear_reference(&mut self, index: usize) {
        if let Some(entry) = self.frames.get(index) {
            if let Some(process) = self.processes.get_mut(&entry.owner) {
                process.page_dir.set_accessed(entry.vaddr, false);
            }
        }
    }
}
