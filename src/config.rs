//! Well-known names and sizes for the backing region.
//!
//! Every process that wants to share aggregates must agree on these names.
//! [`RegionConfig::default`] matches the historical well-known names; tests
//! and multi-tenant embedders that don't want to collide on a single
//! machine-wide segment should use [`RegionConfig::named`] instead.

/// Number of slots per [`crate::window::Window`]. Fixed at 10 to hit the
/// +-10% temporal precision the design targets (100% / 10 slots = 10%).
pub const SLOT_COUNT: usize = 10;

/// Upper bound on the number of distinct named windows a region can hold.
/// Sized, along with [`RegionConfig::segment_size`], for "~1000 Windows at
/// ~600 bytes each".
pub const MAX_WINDOWS: usize = 1000;

/// Upper bound on a stat name's length in bytes (UTF-8).
pub const MAX_NAME_LEN: usize = 64;

/// Default interval applied to windows created without an explicit
/// `set_interval` call: 600 seconds (10 minutes).
pub const DEFAULT_INTERVAL_SECS: u64 = 600;

const DEFAULT_SEGMENT_NAME: &str = "STATBLOCK_STORAGE";

/// Name and sizing for one backing region.
///
/// The original implementation's naming scheme also named the cross-process
/// mutex and the inter-process ref counter separately (`STATBLOCK_STORAGE_MUTEX`,
/// `STATBLOCK_STORAGE_REF_COUNTER`); this implementation stores both inline
/// in `RegionHeader` instead of behind their own named OS objects (see the
/// design notes on the reclamation race that fixes), so there is nothing
/// else for this config to name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub segment_name: String,
    pub segment_size: usize,
}

impl RegionConfig {
    /// Build a config whose segment name is namespaced under `prefix`, so
    /// independent tests (or independent logical deployments) on one host
    /// never collide on the same `shm_open` name.
    pub fn named(prefix: impl AsRef<str>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            segment_name: format!("{DEFAULT_SEGMENT_NAME}_{prefix}"),
            segment_size: Self::default_segment_size(),
        }
    }

    fn default_segment_size() -> usize {
        // Sized for MAX_WINDOWS registry entries plus the region header.
        // ~2 MiB, matching the original's SEGMENT_SIZE constant.
        2_091_008
    }
}

impl Default for RegionConfig {
    /// Matches the well-known name every cooperating process must agree on
    /// (overridable via `STATBLOCK_SEGMENT_PREFIX` for operators who run more
    /// than one independent deployment on a single host).
    fn default() -> Self {
        match std::env::var("STATBLOCK_SEGMENT_PREFIX") {
            Ok(prefix) if !prefix.is_empty() => Self::named(prefix),
            _ => Self {
                segment_name: DEFAULT_SEGMENT_NAME.to_string(),
                segment_size: Self::default_segment_size(),
            },
        }
    }
}
