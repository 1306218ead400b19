use core::sync::atomic::AtomicU16;

pub type Pid = u16;
pub type Tid = u16;
pub type AtomicTid = AtomicU16;

/// Tid value that no running thread ever has. Tids are handed out starting at 1.
pub const NO_TID: Tid = 0;

/// The thread on whose behalf a memory operation runs.
///
/// The fault handler fills this in from the running thread; the core never looks the running
/// thread up by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub pid: Pid,
    pub tid: Tid,
}

impl Caller {
    pub const fn new(pid: Pid, tid: Tid) -> Self {
        Self { pid, tid }
    }
}
