pub mod ticket;
pub use self::ticket::{TicketMutex, TicketMutexGuard};

use crate::threading::process::{AtomicTid, Tid, NO_TID};
use core::sync::atomic::Ordering;
use core::{
    fmt,
    ops::{Deref, DerefMut},
};

#[cfg(feature = "ticket_mutex")]
type InnerMutex<T> = TicketMutex<T>;
#[cfg(feature = "ticket_mutex")]
type InnerMutexGuard<'a, T> = TicketMutexGuard<'a, T>;

#[cfg(not(feature = "ticket_mutex"))]
type InnerMutex<T> = TicketMutex<T>;
#[cfg(not(feature = "ticket_mutex"))]
type InnerMutexGuard<'a, T> = TicketMutexGuard<'a, T>;

/// A lock that provides mutually exclusive data access and remembers which thread holds it.
///
/// Locking from the thread that already holds the lock would spin forever. Instead, [`lock`]
/// reports it as [`WouldDeadlock`].
///
/// [`lock`]: Mutex::lock
pub struct Mutex<T: ?Sized> {
    holder: AtomicTid,
    inner: InnerMutex<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

/// A guard that provides mutable data access.
pub struct MutexGuard<'a, T: 'a + ?Sized> {
    holder: &'a AtomicTid,
    inner: InnerMutexGuard<'a, T>,
}

/// The calling thread already holds the lock it tried to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldDeadlock {
    pub tid: Tid,
}

impl fmt::Display for WouldDeadlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {} tried to re-acquire a lock it holds", self.tid)
    }
}

impl core::error::Error for WouldDeadlock {}

impl<T> Mutex<T> {
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self {
            holder: AtomicTid::new(NO_TID),
            inner: InnerMutex::new(value),
        }
    }

    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the lock on behalf of thread `tid`, waiting for other holders.
    pub fn lock(&self, tid: Tid) -> Result<MutexGuard<T>, WouldDeadlock> {
        debug_assert_ne!(tid, NO_TID, "tid 0 is reserved for the unheld state");

        // Only `tid` itself ever stores `tid` here, so this cannot race with its own release.
        if self.holder.load(Ordering::Acquire) == tid {
            return Err(WouldDeadlock { tid });
        }

        let inner = self.inner.lock();
        self.holder.store(tid, Ordering::Release);
        Ok(MutexGuard {
            holder: &self.holder,
            inner,
        })
    }

    pub fn try_lock(&self, tid: Tid) -> Option<MutexGuard<T>> {
        let inner = self.inner.try_lock()?;
        self.holder.store(tid, Ordering::Release);
        Some(MutexGuard {
            holder: &self.holder,
            inner,
        })
    }

    /// The thread currently holding the lock, if any.
    pub fn holder(&self) -> Option<Tid> {
        match self.holder.load(Ordering::Acquire) {
            NO_TID => None,
            tid => Some(tid),
        }
    }

    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: ?Sized + Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<'a, T: ?Sized> Deref for MutexGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<'a, T: ?Sized> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<'a, T: ?Sized> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        // Runs before `inner` releases the lock.
        self.holder.store(NO_TID, Ordering::Release);
    }
}
