//! Named lookup: `name -> Window`, living inside the region as a
//! fixed-capacity array instead of a pointer-based map (see the data model
//! notes in SPEC_FULL.md for why: no heap pointers can cross the process
//! boundary safely, so the "allocator" here is just a bump index into a
//! preallocated array).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::config::MAX_NAME_LEN;
use crate::error::{StatError, StatResult};
use crate::window::Window;

/// One registry slot: an occupied flag, an inline name, and the `Window`
/// itself. `#[repr(C)]` so the layout is stable across the process boundary.
#[repr(C)]
pub struct RegistryEntry {
    occupied: AtomicBool,
    name_len: AtomicU32,
    name: [AtomicU8; MAX_NAME_LEN],
    pub window: Window,
}

impl RegistryEntry {
    fn name_matches(&self, name: &str) -> bool {
        let len = self.name_len.load(Ordering::Acquire) as usize;
        if len != name.len() {
            return false;
        }
        name.bytes()
            .enumerate()
            .all(|(i, b)| self.name[i].load(Ordering::Relaxed) == b)
    }

    fn write_name(&self, name: &str) {
        for (i, b) in name.bytes().enumerate() {
            self.name[i].store(b, Ordering::Relaxed);
        }
        self.name_len.store(name.len() as u32, Ordering::Release);
    }
}

/// Find the `Window` for `name`, creating it with `interval_us` if absent.
///
/// Idempotent by name: a second call with a different `interval_us` returns
/// the existing window unchanged (first-writer-wins for the interval — a
/// deliberate design choice callers must be aware of, carried over from the
/// original implementation's `find_or_construct` semantics).
///
/// Must be called with `entries` pointing at a region's fixed entry array
/// and `registry_mutex` already held by the caller (the region owns
/// acquiring it, since the same mutex also guards lifecycle transitions and
/// lock ordering matters — see the concurrency section of SPEC_FULL.md).
pub fn find_or_create(
    entries: &[RegistryEntry],
    next_free: &AtomicU32,
    name: &str,
    interval_us: u64,
    now_us: u64,
) -> StatResult<u32> {
    if name.len() > MAX_NAME_LEN {
        return Err(StatError::NameTooLong {
            name: name.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.occupied.load(Ordering::Acquire) && entry.name_matches(name) {
            return Ok(i as u32);
        }
    }

    let idx = next_free.load(Ordering::Relaxed);
    if idx as usize >= entries.len() {
        return Err(StatError::RegionFull {
            capacity: entries.len(),
        });
    }

    let entry = &entries[idx as usize];
    entry.write_name(name);
    // SAFETY: this entry was never occupied (idx came from next_free, a
    // monotonically increasing bump index), so no other attacher can have
    // observed or initialized its `Window` yet; we hold the registry mutex.
    unsafe {
        entry.window.init_in_place(interval_us, now_us)?;
    }
    entry.occupied.store(true, Ordering::Release);
    next_free.store(idx + 1, Ordering::Relaxed);
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::zeroed_boxed_slice;

    #[test]
    fn create_then_find_is_idempotent() {
        let entries = zeroed_boxed_slice::<RegistryEntry>(4);
        let next_free = AtomicU32::new(0);

        let h1 = find_or_create(&entries, &next_free, "f", 10_000_000, 0).unwrap();
        let h2 = find_or_create(&entries, &next_free, "f", 999_000_000, 1_000).unwrap();
        assert_eq!(h1, h2);
        // First-writer-wins: the second call's interval is ignored.
        assert_eq!(entries[h1 as usize].window.interval_us(), 10_000_000);
    }

    #[test]
    fn distinct_names_get_distinct_entries() {
        let entries = zeroed_boxed_slice::<RegistryEntry>(4);
        let next_free = AtomicU32::new(0);

        let h1 = find_or_create(&entries, &next_free, "a", 1_000_000, 0).unwrap();
        let h2 = find_or_create(&entries, &next_free, "b", 1_000_000, 0).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn region_full_when_capacity_exhausted() {
        let entries = zeroed_boxed_slice::<RegistryEntry>(2);
        let next_free = AtomicU32::new(0);

        find_or_create(&entries, &next_free, "a", 1_000_000, 0).unwrap();
        find_or_create(&entries, &next_free, "b", 1_000_000, 0).unwrap();
        let err = find_or_create(&entries, &next_free, "c", 1_000_000, 0).unwrap_err();
        assert!(matches!(err, StatError::RegionFull { capacity: 2 }));
    }

    #[test]
    fn name_longer_than_limit_is_rejected() {
        let entries = zeroed_boxed_slice::<RegistryEntry>(1);
        let next_free = AtomicU32::new(0);
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        let err = find_or_create(&entries, &next_free, &long_name, 1_000_000, 0).unwrap_err();
        assert!(matches!(err, StatError::NameTooLong { .. }));
    }
}
