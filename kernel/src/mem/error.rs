use crate::block::block_error::BlockError;
use crate::sync::mutex::WouldDeadlock;
use crate::vfs;
use core::fmt;

pub type Result<T> = core::result::Result<T, VmError>;

/// Errors from the memory core.
///
/// [`VmError::Process`] faults are the faulting process's problem and should terminate only that
/// process. [`VmError::Fatal`] means the core could not keep its invariants; the caller decides
/// whether that ends the process or halts the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    Process(ProcessFault),
    Fatal(FatalError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessFault {
    /// The mmap backing record is missing, empty or larger than a page.
    InvalidMmapRegion(MmapFault),
    /// No page is registered at the address.
    NotRegistered,
    /// The address is not page aligned.
    Misaligned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapFault {
    Missing,
    Empty,
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// No free frame, even after evicting one.
    AllocationFailure,
    EvictionFailure(EvictionCause),
    /// The address space refused the mapping.
    InstallFailure,
    /// The frame lock was requested by the thread already holding it.
    ReentrantLock,
    /// The process has no registered address space.
    UnknownProcess,
    /// The frame is not in the frame table.
    UnknownFrame,
    SwapIo(BlockError),
    FileIo(vfs::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionCause {
    /// Every resident page is pinned.
    NoVictim,
    /// No free slot in the swap scan region.
    SwapFull,
}

impl VmError {
    pub const ALLOCATION_FAILURE: Self = Self::Fatal(FatalError::AllocationFailure);
    pub const INSTALL_FAILURE: Self = Self::Fatal(FatalError::InstallFailure);

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    pub const fn invalid_mmap(fault: MmapFault) -> Self {
        Self::Process(ProcessFault::InvalidMmapRegion(fault))
    }

    pub const fn eviction(cause: EvictionCause) -> Self {
        Self::Fatal(FatalError::EvictionFailure(cause))
    }
}

impl From<ProcessFault> for VmError {
    fn from(fault: ProcessFault) -> Self {
        Self::Process(fault)
    }
}

impl From<FatalError> for VmError {
    fn from(error: FatalError) -> Self {
        Self::Fatal(error)
    }
}

impl From<BlockError> for VmError {
    fn from(error: BlockError) -> Self {
        Self::Fatal(FatalError::SwapIo(error))
    }
}

impl From<vfs::Error> for VmError {
    fn from(error: vfs::Error) -> Self {
        Self::Fatal(FatalError::FileIo(error))
    }
}

impl From<WouldDeadlock> for VmError {
    fn from(_: WouldDeadlock) -> Self {
        Self::Fatal(FatalError::ReentrantLock)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(fault) => write!(f, "process fault: {fault}"),
            Self::Fatal(error) => write!(f, "fatal memory error: {error}"),
        }
    }
}

impl fmt::Display for ProcessFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMmapRegion(MmapFault::Missing) => write!(f, "no mmap region at address"),
            Self::InvalidMmapRegion(MmapFault::Empty) => write!(f, "mmap region is empty"),
            Self::InvalidMmapRegion(MmapFault::Oversized) => {
                write!(f, "mmap region is larger than a page")
            }
            Self::NotRegistered => write!(f, "no page registered at address"),
            Self::Misaligned => write!(f, "address is not page aligned"),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailure => write!(f, "allocation after eviction failed"),
            Self::EvictionFailure(EvictionCause::NoVictim) => {
                write!(f, "eviction failed: every resident page is pinned")
            }
            Self::EvictionFailure(EvictionCause::SwapFull) => {
                write!(f, "eviction failed: no space in swap")
            }
            Self::InstallFailure => write!(f, "installation of page failed"),
            Self::ReentrantLock => write!(f, "frame lock re-acquired by its holder"),
            Self::UnknownProcess => write!(f, "process has no address space"),
            Self::UnknownFrame => write!(f, "frame is not in the frame table"),
            Self::SwapIo(error) => write!(f, "swap I/O: {error}"),
            Self::FileIo(error) => write!(f, "mmap file I/O: {error}"),
        }
    }
}

impl core::error::Error for VmError {}
