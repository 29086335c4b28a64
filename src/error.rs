//! Error taxonomy for the region/registry layer.
//!
//! Per the module contract, none of these ever reach a [`crate::StatModule`]
//! caller directly — the facade absorbs them into the null-handle / zero
//! convention. They exist so the internal layers (`region`, `registry`,
//! `lifecycle`) can propagate failure with `?` instead of the "broad catch"
//! the original source used.

use thiserror::Error;

/// Failures that can occur while attaching to or mutating the shared region.
#[derive(Debug, Error)]
pub enum StatError {
    /// The backing shared-memory segment could not be opened or created.
    #[error("failed to attach backing region {name:?}: {source}")]
    RegionAttach {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The region's registry has no space left for a new named window.
    #[error("region registry is full (capacity {capacity})")]
    RegionFull { capacity: usize },

    /// A name does not fit the registry's fixed-width key storage.
    #[error("stat name {name:?} exceeds the {max} byte limit")]
    NameTooLong { name: String, max: usize },

    /// An internal invariant was violated. Debug builds should have already
    /// panicked via `debug_assert!` before this is ever constructed; this
    /// variant exists for the release-mode "log and ignore" path described
    /// in the module contract.
    #[error("internal invariant violated: {0}")]
    Poisoned(&'static str),
}

pub type StatResult<T> = std::result::Result<T, StatError>;
