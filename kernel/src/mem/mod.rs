//! User memory: physical frames, the pages that live in them, and where those pages go when
//! memory runs out.

pub mod error;
pub mod frame_allocator;
pub mod frame_table;
pub mod mmap;
pub mod sup_page_table;
pub mod vm;

#[cfg(test)]
mod tests;

pub use error::{FatalError, ProcessFault, Result, VmError};
pub use frame_allocator::{AllocFlags, FramePool, PhysicalMemory};
pub use frame_table::FrameTableEntry;
pub use mmap::{MmapInfo, MmapRegions, MmapTable};
pub use sup_page_table::{PageId, SupPte};
pub use vm::{FrameGuard, Vm, VmIo};
