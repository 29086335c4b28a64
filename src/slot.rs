//! Per-slot accumulator: one time bucket inside a [`crate::window::Window`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel stored in [`Slot::min`] while the slot has never been folded
/// into (`count == 0`). Chosen, like the original's `uint64_t(-1)`, to be
/// distinguishable from any real duration.
pub const UNSET_MIN: u64 = u64::MAX;

/// One time bucket's count/sum/min/max accumulator.
///
/// `#[repr(C)]` and atomic-only fields so a `Slot` can be placed directly
/// inside a shared-memory segment and folded into concurrently by any
/// attached process without a separate lock (the enclosing
/// [`crate::window::Window`] still takes its own mutex around a whole
/// aggregation pass, but the individual field updates here are lock-free).
///
/// Invariant: `count == 0` implies `sum == 0 && max == 0 && min == UNSET_MIN`;
/// `count > 0` implies `min <= sum / count <= max`.
#[repr(C)]
#[derive(Debug)]
pub struct Slot {
    pub count: AtomicU64,
    pub sum: AtomicU64,
    pub min: AtomicU64,
    pub max: AtomicU64,
}

impl Slot {
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(UNSET_MIN),
            max: AtomicU64::new(0),
        }
    }

    /// Reset the slot to its just-constructed state. Called under the
    /// owning Window's mutex during rollover; never reallocated.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(UNSET_MIN, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }

    /// Fold one sample into this slot. Always called under the owning
    /// Window's mutex, so `Relaxed` is sufficient — there is no concurrent
    /// writer to synchronize with inside the critical section.
    ///
    /// `min` and `max` are updated independently: a source bug in the
    /// original implementation gated the `max` update on an `else if` off
    /// the `min` branch, silently dropping `max` updates whenever a sample
    /// also happened to refresh `min`. Both comparisons here are
    /// unconditional.
    pub fn fold(&self, duration: u64) {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.sum.fetch_add(duration, Ordering::Relaxed);

        if count == 1 || duration < self.min.load(Ordering::Relaxed) {
            self.min.store(duration, Ordering::Relaxed);
        }
        if duration > self.max.load(Ordering::Relaxed) {
            self.max.store(duration, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn min(&self) -> u64 {
        self.min.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}
