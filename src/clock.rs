//! A monotonic microsecond clock shared correctly across processes.
//!
//! `CLOCK_MONOTONIC` is a per-host counter (time since an arbitrary point,
//! usually boot), not a per-process one, so timestamps taken by different
//! processes on the same machine are directly comparable — which is exactly
//! what's needed for `window_start` to mean the same thing to every attached
//! process. `std::time::Instant` wraps the same clock on Unix but doesn't
//! expose raw ticks, so this module calls `clock_gettime` directly.

/// Current monotonic time, in microseconds since an arbitrary fixed point.
#[cfg(unix)]
pub fn now_micros() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, fully-initialized out-parameter.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    debug_assert_eq!(rc, 0, "clock_gettime(CLOCK_MONOTONIC) failed");
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000)
        .saturating_add((ts.tv_nsec as u64) / 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
    }
}
