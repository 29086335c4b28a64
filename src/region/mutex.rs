//! A pthread mutex placed inside shared memory, usable by any attached
//! process (`PTHREAD_PROCESS_SHARED`).
//!
//! Boost's `named_mutex` (used by the original implementation) wraps this
//! same POSIX primitive; there is no crate in this ecosystem that exposes a
//! cross-process mutex without pulling in a managed-segment allocator we
//! don't want, so this module talks to `libc` directly, the way
//! `examples/other_examples/60f5d29e_*vortex*shm.rs.rs` talks to `mmap`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crate::error::{StatError, StatResult};

/// Raw process-shared mutex. Must be placed at a stable address inside a
/// shared-memory segment (never moved, never copied) and initialized
/// exactly once — by whichever process creates the segment. Every later
/// attacher maps the same already-initialized bytes and just locks/unlocks.
#[repr(transparent)]
pub struct RawProcessMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: every operation on `inner` either goes through pthread's own
// synchronization (lock/unlock) or happens before any other attacher can
// observe the segment (init_in_place, gated by the region's magic flag).
unsafe impl Send for RawProcessMutex {}
unsafe impl Sync for RawProcessMutex {}

impl RawProcessMutex {
    /// Initialize a process-shared mutex in place.
    ///
    /// # Safety
    ///
    /// Caller must guarantee this runs exactly once per segment, before any
    /// other process maps the segment, and that `self` remains at this
    /// address for the lifetime of the segment.
    pub unsafe fn init_in_place(&self) -> StatResult<()> {
        let mut attr: MaybeUninit<libc::pthread_mutexattr_t> = MaybeUninit::uninit();
        if libc::pthread_mutexattr_init(attr.as_mut_ptr()) != 0 {
            return Err(StatError::Poisoned("pthread_mutexattr_init failed"));
        }
        let mut attr = attr.assume_init();
        if libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(StatError::Poisoned("pthread_mutexattr_setpshared failed"));
        }
        let rc = libc::pthread_mutex_init(self.inner.get(), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if rc != 0 {
            return Err(StatError::Poisoned("pthread_mutex_init failed"));
        }
        Ok(())
    }

    /// Lock the mutex, blocking until acquired.
    ///
    /// Recovery from a stale lock (holder crashed mid-critical-section) is
    /// out of scope, per the module contract; this mutex is not created with
    /// `PTHREAD_MUTEX_ROBUST`.
    pub fn lock(&self) -> RawProcessMutexGuard<'_> {
        // SAFETY: `inner` was initialized by `init_in_place` before this
        // segment became reachable by any other attacher.
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_lock failed: {rc}");
        if rc != 0 {
            tracing::error!(errno = rc, "pthread_mutex_lock failed; proceeding unlocked");
        }
        RawProcessMutexGuard { mutex: self }
    }
}

/// RAII guard releasing a [`RawProcessMutex`] on drop.
pub struct RawProcessMutexGuard<'a> {
    mutex: &'a RawProcessMutex,
}

impl Drop for RawProcessMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: we hold the lock acquired in `RawProcessMutex::lock`.
        let rc = unsafe { libc::pthread_mutex_unlock(self.mutex.inner.get()) };
        debug_assert_eq!(rc, 0, "pthread_mutex_unlock failed: {rc}");
    }
}
