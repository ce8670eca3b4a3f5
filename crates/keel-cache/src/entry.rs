use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Importance of a cached value or an admitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Weight subtracted from the eviction score; higher priority keeps an
    /// entry in the cache longer at equal age and access history.
    fn eviction_weight(self) -> f64 {
        match self {
            Priority::Low => 0.0,
            Priority::Medium => 0.5,
            Priority::High => 1.0,
            Priority::Critical => 2.0,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A cached value plus the bookkeeping eviction decisions are made from.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_access_at: Instant,
    pub access_count: u64,
    pub estimated_size: u64,
    pub priority: Priority,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, estimated_size: u64, priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            last_access_at: now,
            access_count: 0,
            estimated_size,
            priority,
        }
    }

    pub fn is_expired(&self, now: Instant, max_age: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > max_age
    }

    pub fn record_access(&mut self, now: Instant) {
        self.last_access_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Eviction score; the highest-scoring candidate is removed first.
    ///
    /// Staleness (time since last access, normalized by `max_age`) and
    /// infrequency both raise the score; priority lowers it.
    pub fn eviction_score(&self, now: Instant, max_age: Duration) -> f64 {
        let age = now.saturating_duration_since(self.last_access_at);
        let age_score = age.as_secs_f64() / max_age.as_secs_f64().max(f64::EPSILON);
        let access_score = 1.0 / (1.0 + self.access_count as f64);
        age_score + access_score - self.priority.eviction_weight()
    }
}
