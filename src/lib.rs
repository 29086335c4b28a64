#![doc = include_str!("../README.md")]

mod clock;
mod config;
mod error;
mod lifecycle;
mod region;
mod registry;
mod slot;
#[cfg(test)]
mod testutil;
mod window;

pub use config::{RegionConfig, DEFAULT_INTERVAL_SECS, MAX_NAME_LEN, MAX_WINDOWS, SLOT_COUNT};
pub use error::{StatError, StatResult};
pub use lifecycle::StatContext;

use std::sync::atomic::{AtomicU64, Ordering};

use lifecycle::AcquiredRegion;

/// Opaque reference to one [`window::Window`] inside one region.
///
/// Valid only while the [`StatModule`] that produced it is alive — the
/// handle is a plain index into a region's registry, carrying no generation
/// or lifetime of its own, exactly as the original's raw `STAT_HANDLE`
/// pointer worked. [`NamedHandle::NULL`] is the sentinel returned in place
/// of the original's null pointer whenever creation fails
/// ([`StatError::RegionFull`], a failed region attach, or a name that does
/// not fit [`MAX_NAME_LEN`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedHandle(u32);

impl NamedHandle {
    /// The sentinel "no window" handle. Every `AddCallInfo`/`Get*` call on
    /// it is a no-op / zero-return, matching spec's `ENullHandle` identity
    /// rule.
    pub const NULL: NamedHandle = NamedHandle(u32::MAX);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

/// Thin user-facing API: attach to the backing region on construction,
/// detach on drop, and resolve named windows through [`StatContext`].
///
/// Renamed from the original's `SetInterval`/`AddStat`/`AddCallInfo`/
/// `Get*` to idiomatic Rust method names; the semantics are unchanged.
/// Every failure mode (region unreachable, registry full, null handle) is
/// absorbed here into `NamedHandle::NULL` / a `0` return rather than
/// propagated, per the "observability sidecar must never affect caller
/// control flow" rule.
pub struct StatModule<'ctx> {
    context: &'ctx StatContext,
    _acquired: Option<AcquiredRegion<'ctx>>,
    interval_us: AtomicU64,
}

impl<'ctx> StatModule<'ctx> {
    /// Attach to `context`'s backing region, incrementing its process/user
    /// counts. If the region cannot be attached, the returned `StatModule`
    /// is still usable — every subsequent call becomes a documented no-op
    /// — rather than returning a `Result`, matching the original
    /// constructor's "never throws, just ends up with a null `pStorage`"
    /// behavior.
    pub fn new(context: &'ctx StatContext) -> Self {
        let acquired = context.manager().acquire();
        if acquired.is_none() {
            tracing::warn!("StatModule constructed without a usable stat region; all calls will no-op");
        }
        Self {
            context,
            _acquired: acquired,
            interval_us: AtomicU64::new(DEFAULT_INTERVAL_SECS * 1_000_000),
        }
    }

    /// Attach to the process-wide default context ([`StatContext::global`]),
    /// giving the original constructor's zero-argument ergonomics.
    pub fn attach_default() -> StatModule<'static> {
        StatModule::new(StatContext::global())
    }

    /// Set the interval (in seconds) applied to windows created by future
    /// `add_stat` calls. Existing windows keep the interval they were
    /// created with — the registry is first-writer-wins, a deliberate
    /// design choice callers must be aware of.
    pub fn set_interval(&self, seconds: u64) {
        self.interval_us.store(seconds.saturating_mul(1_000_000), Ordering::Relaxed);
    }

    /// Return the handle for `name`, creating its window (with the
    /// interval set by the most recent `set_interval` call, or the
    /// 600-second default) if this is the first call for that name in this
    /// region's lifetime.
    ///
    /// Returns [`NamedHandle::NULL`] if the region could not be attached
    /// ([`StatError::RegionAttach`]) or the registry has no room left
    /// ([`StatError::RegionFull`]); both failures are logged, not
    /// propagated.
    pub fn add_stat(&self, name: &str) -> NamedHandle {
        if self._acquired.is_none() {
            return NamedHandle::NULL;
        }
        let interval_us = self.interval_us.load(Ordering::Relaxed);
        match self.context.manager().find_or_create(name, interval_us) {
            Ok(index) => NamedHandle(index),
            Err(err) => {
                tracing::warn!(name, error = %err, "add_stat failed; returning null handle");
                NamedHandle::NULL
            }
        }
    }

    /// Fold one sample (in caller-defined, but call-site-consistent, time
    /// units) into `handle`'s window. No-op on a null handle.
    pub fn add_call_info(&self, handle: NamedHandle, duration: u64) {
        if handle.is_null() {
            return;
        }
        let now = clock::now_micros();
        self.with_window(handle, |window| window.record(duration, now));
    }

    /// Total recorded calls currently inside `handle`'s live window. `0` on
    /// a null handle.
    pub fn get_call_count(&self, handle: NamedHandle) -> u64 {
        self.read(handle, window::Window::call_count)
    }

    /// Mean duration over `handle`'s live window, integer division, `0`
    /// when the window is empty or the handle is null.
    pub fn get_avg_duration(&self, handle: NamedHandle) -> u64 {
        self.read(handle, window::Window::avg_duration)
    }

    /// Maximum duration over `handle`'s live window, `0` when empty or
    /// null.
    pub fn get_max_duration(&self, handle: NamedHandle) -> u64 {
        self.read(handle, window::Window::max_duration)
    }

    /// Minimum duration over `handle`'s live window, `0` when empty or
    /// null.
    pub fn get_min_duration(&self, handle: NamedHandle) -> u64 {
        self.read(handle, window::Window::min_duration)
    }

    fn read(&self, handle: NamedHandle, f: impl FnOnce(&window::Window, u64) -> u64) -> u64 {
        if handle.is_null() {
            return 0;
        }
        let now = clock::now_micros();
        self.with_window(handle, |window| f(window, now)).unwrap_or(0)
    }

    fn with_window<R>(&self, handle: NamedHandle, f: impl FnOnce(&window::Window) -> R) -> Option<R> {
        self.context.manager().with_window(handle.0, f)
    }
}
