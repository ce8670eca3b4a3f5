use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Governor-wide operation and tick counters.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    released: AtomicU64,
    force_released: AtomicU64,
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
}

impl Counters {
    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_force_released(&self, count: u64) {
        self.force_released.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            force_released: self.force_released.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values included in [`crate::StatusSnapshot`].
///
/// `released` counts caller releases; `force_released` counts deadline
/// expiries, emergency cancellations and shutdown drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub released: u64,
    pub force_released: u64,
    pub ticks: u64,
    pub skipped_ticks: u64,
}
