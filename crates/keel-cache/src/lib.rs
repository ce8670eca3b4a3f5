//! Priority-aware bounded caches for Keel.
//!
//! Values carry a [`Priority`] that shapes eviction: when a cache exceeds its
//! capacity, low-value entries (old, rarely read, low priority) go first and
//! `Critical` entries are spared unless the cache is badly over budget.
//! Capacity and age bounds are enforced after every mutation, so a cache can
//! never grow without limit between maintenance passes.

mod cache;
mod entry;
mod stats;

pub use cache::{ManagedCache, PriorityCache, DEFAULT_SIZE_ESTIMATE};
pub use entry::{CacheEntry, Priority};
pub use stats::{CacheStats, CacheStatsSnapshot};
