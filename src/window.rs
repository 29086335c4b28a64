//! Sliding-window aggregator: a ring of [`Slot`]s plus a window-start edge.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::SLOT_COUNT;
use crate::region::mutex::RawProcessMutex;
use crate::slot::{Slot, UNSET_MIN};

/// A named aggregator: `SLOT_COUNT` slots covering `interval_us / SLOT_COUNT`
/// each, a rolling `window_start_us` edge, and the mutex that makes every
/// operation here atomic across threads *and* processes.
///
/// `#[repr(C)]` so it can be embedded directly inside a
/// [`crate::registry::RegistryEntry`] living in shared memory.
#[repr(C)]
pub struct Window {
    /// Monotonic microsecond timestamp of the slot-0 edge.
    window_start_us: AtomicU64,
    /// Total window span, in microseconds. Set once at creation
    /// (first-writer-wins, per the registry's idempotent-creation contract)
    /// and never mutated afterwards.
    interval_us: AtomicU64,
    /// Physical index of the logical "oldest" slot (logical slot 0). Slots
    /// are a physical ring so rollover never needs to move sample data —
    /// only the window's notion of where "oldest" currently points.
    head: AtomicUsize,
    /// The cross-process mutex guarding every operation below.
    mutex: RawProcessMutex,
    slots: [Slot; SLOT_COUNT],
}

impl Window {
    /// Initialize a freshly-allocated (zeroed) `Window` in place.
    ///
    /// # Safety
    /// Same contract as [`RawProcessMutex::init_in_place`]: call exactly
    /// once, before any other process can observe this `Window`.
    pub unsafe fn init_in_place(&self, interval_us: u64, now_us: u64) -> crate::error::StatResult<()> {
        self.mutex.init_in_place()?;
        self.window_start_us.store(now_us, Ordering::Relaxed);
        self.interval_us.store(interval_us, Ordering::Relaxed);
        self.head.store(0, Ordering::Relaxed);
        for slot in &self.slots {
            slot.reset();
        }
        Ok(())
    }

    pub fn interval_us(&self) -> u64 {
        self.interval_us.load(Ordering::Relaxed)
    }

    /// Fold one sample into the window at `now_us`.
    pub fn record(&self, duration_us: u64, now_us: u64) {
        let _guard = self.mutex.lock();
        let idx = self.advance(now_us);
        self.slots[idx].fold(duration_us);
    }

    pub fn call_count(&self, now_us: u64) -> u64 {
        let _guard = self.mutex.lock();
        self.advance(now_us);
        self.slots.iter().map(Slot::count).sum()
    }

    pub fn avg_duration(&self, now_us: u64) -> u64 {
        let _guard = self.mutex.lock();
        self.advance(now_us);
        let (count, sum) = self
            .slots
            .iter()
            .fold((0u64, 0u64), |(c, s), slot| (c + slot.count(), s + slot.sum()));
        if count == 0 {
            0
        } else {
            sum / count
        }
    }

    pub fn max_duration(&self, now_us: u64) -> u64 {
        let _guard = self.mutex.lock();
        self.advance(now_us);
        self.slots.iter().map(Slot::max).max().unwrap_or(0)
    }

    pub fn min_duration(&self, now_us: u64) -> u64 {
        let _guard = self.mutex.lock();
        self.advance(now_us);
        let min = self.slots.iter().map(Slot::min).min().unwrap_or(UNSET_MIN);
        if min == UNSET_MIN {
            0
        } else {
            min
        }
    }

    /// Discard stale slots (if any) and return the physical index of the
    /// slot that `now_us` falls into. Must be called under `mutex`.
    ///
    /// Implements spec CASE A (in window) / CASE B (partial rollover) /
    /// CASE C (full rollover), including the guard against the
    /// `shift == SLOT_COUNT - 1` edge: that shift is strictly less than
    /// `SLOT_COUNT`, so it already falls into CASE A below and never reaches
    /// the partial-rollover branch (the source bug this corrects assumed
    /// `shift >= SLOT_COUNT` when subtracting `SLOT_COUNT - 1`).
    fn advance(&self, now_us: u64) -> usize {
        let n = SLOT_COUNT as u64;
        let window_start = self.window_start_us.load(Ordering::Relaxed);
        // Clock non-monotonicity (time apparently moving backwards) is
        // tolerated by clamping elapsed time to zero.
        let elapsed = now_us.saturating_sub(window_start);
        let interval = self.interval_us.load(Ordering::Relaxed);

        let shift: u64 = if interval == 0 {
            // Degenerate interval: treat as perpetually stale (CASE C).
            2 * n
        } else {
            ((elapsed as u128 * n as u128) / interval as u128) as u64
        };

        if shift < n {
            // CASE A: still inside the current window.
            let head = self.head.load(Ordering::Relaxed);
            return (head + shift as usize) % SLOT_COUNT;
        }

        let slot_span = if interval == 0 { 0 } else { interval / n };

        if shift < 2 * n {
            // CASE B: partial rollover. Discard the `to_discard` oldest
            // slots and reuse their storage as fresh slots at the new end
            // of the ring; the new window_start advances by that many
            // slot-spans.
            let to_discard = (shift - (n - 1)) as usize;
            let old_head = self.head.load(Ordering::Relaxed);
            for i in 0..to_discard.min(SLOT_COUNT) {
                self.slots[(old_head + i) % SLOT_COUNT].reset();
            }
            let new_head = (old_head + to_discard) % SLOT_COUNT;
            self.head.store(new_head, Ordering::Relaxed);
            self.window_start_us.store(
                window_start.saturating_add((to_discard as u64).saturating_mul(slot_span)),
                Ordering::Relaxed,
            );
            // The newly current slot is the last one just reset.
            return (new_head + SLOT_COUNT - 1) % SLOT_COUNT;
        }

        // CASE C: every slot is stale. Reset the whole ring and fold into
        // logical (and physical) slot 0.
        for slot in &self.slots {
            slot.reset();
        }
        self.head.store(0, Ordering::Relaxed);
        self.window_start_us.store(
            window_start.saturating_add(shift.saturating_mul(slot_span)),
            Ordering::Relaxed,
        );
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::zeroed_box;

    /// A `Window` only ever legitimately lives inline inside a shared-memory
    /// region, constructed in place over already-zeroed bytes. For unit
    /// tests we reproduce exactly that: a zeroed allocation, reinterpreted
    /// as `Window`, then initialized the same way a region's creator would.
    fn fresh_window(interval_us: u64) -> Box<Window> {
        let window = zeroed_box::<Window>();
        unsafe {
            window.init_in_place(interval_us, 0).unwrap();
        }
        window
    }

    #[test]
    fn case_a_accumulates_within_one_window() {
        let window = fresh_window(10_000_000); // 10s interval -> 1s slots
        window.record(10, 0);
        window.record(20, 100_000);
        window.record(5, 900_000);

        assert_eq!(window.call_count(900_000), 3);
        assert_eq!(window.min_duration(900_000), 5);
        assert_eq!(window.max_duration(900_000), 20);
        assert_eq!(window.avg_duration(900_000), (10 + 20 + 5) / 3);
    }

    #[test]
    fn case_b_partial_rollover_drops_oldest_slots_only() {
        // interval=10s => slot span = 1s.
        let window = fresh_window(10_000_000);
        window.record(7, 0); // slot 0, t in [0,1s)

        // elapsed=10.5s, interval=10s, 10 slots => shift = floor(10.5) = 10,
        // the CASE B boundary: discards exactly the single oldest slot.
        let now_case_b = 10_500_000;
        window.record(3, now_case_b);
        assert_eq!(window.call_count(now_case_b), 1);
        assert_eq!(window.min_duration(now_case_b), 3);
        assert_eq!(window.max_duration(now_case_b), 3);
    }

    #[test]
    fn case_c_full_rollover_clears_everything() {
        let window = fresh_window(1_000_000); // 1s interval
        window.record(5, 0);
        // elapsed well beyond 2*interval.
        window.record(9, 5_000_000);
        assert_eq!(window.call_count(5_000_000), 1);
        assert_eq!(window.min_duration(5_000_000), 9);
        assert_eq!(window.max_duration(5_000_000), 9);
    }

    #[test]
    fn stale_window_reads_as_empty() {
        let window = fresh_window(1_000_000); // 1s interval
        window.record(5, 0);
        assert_eq!(window.call_count(4_000_000), 0);
        assert_eq!(window.min_duration(4_000_000), 0);
        assert_eq!(window.max_duration(4_000_000), 0);
        assert_eq!(window.avg_duration(4_000_000), 0);
    }

    #[test]
    fn fast_recording_is_monotone_within_one_interval() {
        let window = fresh_window(4_000_000); // 4s interval
        for _ in 0..700_000u32 {
            window.record(10, 500_000);
        }
        assert_eq!(window.call_count(500_000), 700_000);
        assert_eq!(window.min_duration(500_000), 10);
        assert_eq!(window.max_duration(500_000), 10);
        assert_eq!(window.avg_duration(500_000), 10);
    }

    #[test]
    fn clock_going_backwards_is_clamped_to_zero_elapsed() {
        let window = fresh_window(1_000_000);
        window.record(1, 10_000_000);
        // A later call with an earlier timestamp must not panic or
        // underflow; elapsed clamps to zero, landing in CASE A at slot 0.
        window.record(2, 5_000_000);
        assert_eq!(window.call_count(10_000_000), 2);
    }
}
