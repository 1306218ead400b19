//! The KidneyOS virtual-memory core: the global frame table, clock eviction to swap or to
//! memory-mapped files, and demand loading of non-resident pages.
//!
//! The fault handler drives everything through [`mem::Vm`]. Collaborators (physical frame
//! pool, page directory, swap device, file I/O) are plugged in through the traits in
//! [`mem`], [`paging`], [`block`] and [`vfs`].

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

pub mod block;
pub mod mem;
pub mod paging;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod threading;
pub mod vfs;
