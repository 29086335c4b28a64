//! Two-level reference counting: a process-local user count `U` plus the
//! region's process count `G` (stored inside the region itself, see
//! [`crate::region::Region`]).
//!
//! [`LifecycleManager`] is the process-wide singleton the original's
//! `StatBlockStorage::CreateStorage`/`RemoveStorage` pair implements as a
//! static instance pointer guarded by a named mutex. Per the "global state"
//! design note (no ambient singletons in the replacement), this module
//! threads that state explicitly through [`StatContext`] instead of a
//! `static mut`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::RegionConfig;
use crate::error::StatResult;
use crate::region::Region;

/// Process-local half of the two-level reference count, plus the live
/// [`Region`] attachment it guards.
///
/// `region` is an `Arc` so that [`LifecycleManager::find_or_create`]/
/// [`LifecycleManager::with_window`] can clone a handle and drop
/// `attachment`'s lock before touching the region/window, instead of holding
/// the one process-wide lock across every call (which would serialize
/// independent `Window`s against each other).
struct Attachment {
    region: Arc<Region>,
    users: u64,
}

/// Per-process lifecycle state for one backing region.
///
/// One `LifecycleManager` corresponds to one `RegionConfig` (one segment
/// name). Most callers only ever need [`StatContext::global`], which wraps
/// exactly one manager bound to `RegionConfig::default()`; tests construct
/// additional managers bound to namespaced configs so they never collide on
/// the same `shm_open` name.
pub struct LifecycleManager {
    config: RegionConfig,
    attachment: Mutex<Option<Attachment>>,
    /// Fast-path hint: the number of live users, checked without taking
    /// `attachment`'s lock so that the common "another Facade in this same
    /// process" path never contends on a `Mutex`. The original's
    /// `StatBlockStorage::CreateStorage` takes this same shortcut: it only
    /// acquires the cross-process named mutex on the very first attach in a
    /// process, bumping `_localRefCounter` directly otherwise.
    fast_users: AtomicU64,
}

impl LifecycleManager {
    pub fn new(config: RegionConfig) -> Self {
        Self {
            config,
            attachment: Mutex::new(None),
            fast_users: AtomicU64::new(0),
        }
    }

    /// Increment the process-local user count, attaching the region if this
    /// is the first user in this process. Returns `None` if attachment
    /// fails (surfaced by the Facade as a permanently-nil region, per
    /// spec's `ERegionAttach` handling).
    pub fn acquire(&self) -> Option<AcquiredRegion<'_>> {
        // Fast path: another Facade in this process already holds the
        // region. No cross-process mutex touched.
        loop {
            let current = self.fast_users.load(Ordering::Acquire);
            if current == 0 {
                break;
            }
            if self
                .fast_users
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let mut guard = self.attachment.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(attachment) = guard.as_mut() {
                    attachment.users += 1;
                    drop(guard);
                    return Some(AcquiredRegion { manager: self });
                }
                // Lost a race with a concurrent release that tore the
                // region down between our fast-path increment and taking
                // the lock; fall through and retry the slow path.
                self.fast_users.fetch_sub(1, Ordering::AcqRel);
            }
        }

        // Slow path: first user in this process. Takes the region's named
        // mutex (inside `Region::attach`) to create/open the segment and
        // bump its process count `G`.
        let mut guard = self.attachment.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(attachment) = guard.as_mut() {
            // Someone else won the race to attach first; just join them.
            attachment.users += 1;
            self.fast_users.store(attachment.users, Ordering::Release);
            drop(guard);
            return Some(AcquiredRegion { manager: self });
        }

        match Region::attach(&self.config) {
            Ok(region) => {
                *guard = Some(Attachment { region: Arc::new(region), users: 1 });
                self.fast_users.store(1, Ordering::Release);
                tracing::info!(segment = %self.config.segment_name, "stat region acquired");
                Some(AcquiredRegion { manager: self })
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to acquire stat region");
                None
            }
        }
    }

    /// Decrement the process-local user count; detach (and possibly
    /// destroy) the region if this was the last user in this process.
    fn release(&self) {
        let mut guard = self.attachment.lock().unwrap_or_else(|e| e.into_inner());
        let Some(attachment) = guard.as_mut() else {
            debug_assert!(false, "release called with no attachment held");
            return;
        };
        debug_assert!(attachment.users > 0, "release called with users already 0");
        attachment.users = attachment.users.saturating_sub(1);
        self.fast_users.store(attachment.users, Ordering::Release);
        if attachment.users == 0 {
            let Attachment { region, .. } = guard.take().expect("checked Some above");
            drop(guard);
            tracing::info!(segment = %self.config.segment_name, "stat region released");
            region.detach();
            // `region` drops here. Any other clone of this `Arc` would imply
            // a live `with_window`/`find_or_create` call in flight, which in
            // turn implies a live `AcquiredRegion` somewhere keeping `users`
            // above zero — so by the time `users` reaches 0, this is always
            // the last clone and `munmap` runs immediately.
        }
    }

    /// Resolve (or create) the named window and return its handle index,
    /// going through the currently attached region.
    ///
    /// Only holds `attachment`'s lock long enough to clone the `Arc<Region>`
    /// handle; the registry lookup itself runs against that clone, outside
    /// the process-wide lock, so callers working with different `Window`s
    /// never contend on it.
    pub fn find_or_create(&self, name: &str, interval_us: u64) -> StatResult<u32> {
        let region = {
            let guard = self.attachment.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .as_ref()
                .expect("find_or_create requires an acquired region")
                .region
                .clone()
        };
        region.find_or_create(name, interval_us)
    }

    /// Run `f` against the window at `index`, or skip it entirely if the
    /// region is not currently attached (should not happen while any
    /// [`AcquiredRegion`] is alive, but callers hold only a `NamedHandle`,
    /// not a borrow, so this stays defensive).
    ///
    /// As with `find_or_create`, `attachment`'s lock is dropped before `f`
    /// runs against the `Window`, so `f` never serializes against another
    /// thread acquiring or releasing in the same process.
    pub fn with_window<R>(&self, index: u32, f: impl FnOnce(&crate::window::Window) -> R) -> Option<R> {
        let region = {
            let guard = self.attachment.lock().unwrap_or_else(|e| e.into_inner());
            guard.as_ref()?.region.clone()
        };
        region.window(index).map(f)
    }
}

/// RAII proof that [`LifecycleManager::acquire`] succeeded; dropping it
/// calls [`LifecycleManager::release`] exactly once.
pub struct AcquiredRegion<'a> {
    manager: &'a LifecycleManager,
}

impl Drop for AcquiredRegion<'_> {
    fn drop(&mut self) {
        self.manager.release();
    }
}

/// Explicit replacement for the original's implicit process-wide
/// singleton (per the "global state" design note): one [`LifecycleManager`]
/// plus the [`RegionConfig`] it was built from, constructed once and shared
/// by every [`crate::StatModule`] that wants the same backing region.
pub struct StatContext {
    manager: LifecycleManager,
}

impl StatContext {
    /// Build a context bound to a specific region configuration. Use this
    /// (with [`RegionConfig::named`]) in tests and multi-tenant embedders
    /// that must not collide on the single well-known segment name.
    pub fn new(config: RegionConfig) -> Self {
        Self {
            manager: LifecycleManager::new(config),
        }
    }

    pub(crate) fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    /// The process-wide default context, bound to
    /// [`RegionConfig::default`]. Gives callers the original's
    /// implicit-singleton ergonomics while keeping the state explicit and
    /// testable for everyone else.
    pub fn global() -> &'static StatContext {
        static GLOBAL: std::sync::OnceLock<StatContext> = std::sync::OnceLock::new();
        GLOBAL.get_or_init(|| StatContext::new(RegionConfig::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::now_micros;

    fn test_config(tag: &str) -> RegionConfig {
        RegionConfig::named(format!("lifecycle_{tag}_{}_{}", std::process::id(), now_micros()))
    }

    #[test]
    fn acquire_release_round_trips_to_detached() {
        let manager = LifecycleManager::new(test_config("round_trip"));
        let a = manager.acquire().expect("acquire");
        assert_eq!(manager.fast_users.load(Ordering::Acquire), 1);
        drop(a);
        assert_eq!(manager.fast_users.load(Ordering::Acquire), 0);
    }

    #[test]
    fn multiple_acquires_in_one_process_share_one_region() {
        let manager = LifecycleManager::new(test_config("multi"));
        let a = manager.acquire().expect("acquire a");
        let b = manager.acquire().expect("acquire b");
        assert_eq!(manager.fast_users.load(Ordering::Acquire), 2);
        drop(a);
        assert_eq!(manager.fast_users.load(Ordering::Acquire), 1);
        drop(b);
        assert_eq!(manager.fast_users.load(Ordering::Acquire), 0);
    }

    #[test]
    fn find_or_create_round_trips_through_the_manager() {
        let manager = LifecycleManager::new(test_config("find_or_create"));
        let _guard = manager.acquire().expect("acquire");
        let handle = manager.find_or_create("f", 10_000_000).unwrap();
        manager
            .with_window(handle, |w| w.record(5, now_micros()))
            .expect("window present");
        let count = manager
            .with_window(handle, |w| w.call_count(now_micros()))
            .expect("window present");
        assert_eq!(count, 1);
    }
}
