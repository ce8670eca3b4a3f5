use crate::entry::{CacheEntry, Priority};
use crate::stats::{CacheStats, CacheStatsSnapshot};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Size charged to an entry when its value refuses to serialize.
pub const DEFAULT_SIZE_ESTIMATE: u64 = 256;

/// Occupancy above which even `Critical` entries become eviction candidates,
/// as a fraction of nominal capacity.
const CRITICAL_EXEMPTION_LIMIT: f64 = 1.2;

/// Maintenance surface the governor drives on every registered cache.
///
/// Object-safe so heterogeneous `PriorityCache<V>` instances can live in one
/// registry; `as_any_arc` recovers the concrete type for callers that know it.
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;
    fn len(&self) -> usize;
    fn estimated_bytes(&self) -> u64;
    /// Remove expired entries, returning the estimated bytes reclaimed.
    fn prune_expired(&self) -> u64;
    /// Shrink to `fraction` of effective capacity, returning bytes reclaimed.
    fn evict_down_to(&self, fraction: f64) -> u64;
    /// Scale effective capacity (degraded mode sets 0.5, recovery restores 1.0).
    fn set_capacity_factor(&self, factor: f64);
    fn clear_all(&self);
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    bytes: u64,
    capacity_factor: f64,
}

/// A bounded cache whose eviction order respects entry [`Priority`].
///
/// `set` and `get` never fail: oversized values degrade to estimates,
/// unserializable values are charged [`DEFAULT_SIZE_ESTIMATE`], and capacity
/// pressure is resolved by evicting low-value entries. Age and capacity
/// bounds are re-enforced after every mutation.
pub struct PriorityCache<V> {
    name: String,
    max_size: usize,
    max_age: Duration,
    inner: Mutex<CacheInner<V>>,
    stats: CacheStats,
}

impl<V> PriorityCache<V> {
    pub fn new(name: impl Into<String>, max_size: usize, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            max_size: max_size.max(1),
            max_age,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                bytes: 0,
                capacity_factor: 1.0,
            }),
            stats: CacheStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn len(&self) -> usize {
        self.lock_inner().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_inner().map.is_empty()
    }

    /// Estimated bytes held, summed over entry size estimates.
    pub fn estimated_bytes(&self) -> u64 {
        self.lock_inner().bytes
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Fetch a value, bumping its access bookkeeping.
    ///
    /// Expired entries are evicted here rather than by a background sweep, so
    /// a stale value is never returned no matter when maintenance last ran.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let mut inner = self.lock_inner();
        let now = Instant::now();
        let expired = match inner.map.get(key) {
            Some(entry) => entry.is_expired(now, self.max_age),
            None => {
                self.stats.record_miss();
                return None;
            }
        };
        if expired {
            if let Some(entry) = inner.map.remove(key) {
                inner.bytes = inner.bytes.saturating_sub(entry.estimated_size);
            }
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }
        let entry = inner.map.get_mut(key)?;
        entry.record_access(now);
        self.stats.record_hit();
        Some(entry.value.clone())
    }

    /// Insert or replace a value, then re-enforce age and capacity bounds.
    pub fn set(&self, key: impl Into<String>, value: V, priority: Priority)
    where
        V: Serialize,
    {
        let key = key.into();
        let estimated_size = match serde_json::to_vec(&value) {
            Ok(encoded) => encoded.len() as u64,
            Err(err) => {
                tracing::debug!(
                    target = "keel.cache",
                    cache = %self.name,
                    key = %key,
                    error = %err,
                    "value did not serialize; charging the default size estimate"
                );
                DEFAULT_SIZE_ESTIMATE
            }
        };

        let mut inner = self.lock_inner();
        if let Some(prev) = inner
            .map
            .insert(key, CacheEntry::new(value, estimated_size, priority))
        {
            inner.bytes = inner.bytes.saturating_sub(prev.estimated_size);
        }
        inner.bytes = inner.bytes.saturating_add(estimated_size);
        self.stats.record_insertion();

        self.prune_expired_locked(&mut inner);
        let target = effective_capacity(self.max_size, inner.capacity_factor);
        self.evict_locked(&mut inner, target);
    }

    /// Drop every entry unconditionally.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        inner.map.clear();
        inner.bytes = 0;
    }

    /// Remove expired entries, returning the estimated bytes reclaimed.
    pub fn prune_expired(&self) -> u64 {
        let mut inner = self.lock_inner();
        self.prune_expired_locked(&mut inner)
    }

    /// Evict down to `fraction` of effective capacity (scored order),
    /// returning the estimated bytes reclaimed.
    pub fn evict_down_to(&self, fraction: f64) -> u64 {
        let mut inner = self.lock_inner();
        let capacity = effective_capacity(self.max_size, inner.capacity_factor);
        let target = ((capacity as f64) * fraction.clamp(0.0, 1.0)).floor() as usize;
        self.evict_locked(&mut inner, target)
    }

    /// Scale effective capacity and immediately enforce the new bound.
    pub fn set_capacity_factor(&self, factor: f64) {
        let mut inner = self.lock_inner();
        inner.capacity_factor = factor.clamp(0.05, 1.0);
        let target = effective_capacity(self.max_size, inner.capacity_factor);
        self.evict_locked(&mut inner, target);
    }

    #[track_caller]
    fn lock_inner(&self) -> MutexGuard<'_, CacheInner<V>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(err) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    target = "keel.cache",
                    cache = %self.name,
                    file = loc.file(),
                    line = loc.line(),
                    column = loc.column(),
                    "mutex poisoned; continuing with recovered guard"
                );
                err.into_inner()
            }
        }
    }

    fn prune_expired_locked(&self, inner: &mut CacheInner<V>) -> u64 {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .map
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, self.max_age))
            .map(|(key, _)| key.clone())
            .collect();
        let mut reclaimed = 0u64;
        for key in expired {
            if let Some(entry) = inner.map.remove(&key) {
                inner.bytes = inner.bytes.saturating_sub(entry.estimated_size);
                reclaimed = reclaimed.saturating_add(entry.estimated_size);
                self.stats.record_expiration();
            }
        }
        reclaimed
    }

    /// Evict highest-scoring entries until `target` entries remain.
    ///
    /// `Critical` entries are skipped while occupancy is at or below the
    /// exemption limit; past it they compete like everyone else, so a cache
    /// full of `Critical` values still cannot grow without bound.
    fn evict_locked(&self, inner: &mut CacheInner<V>, target: usize) -> u64 {
        let mut reclaimed = 0u64;
        let now = Instant::now();
        while inner.map.len() > target {
            let over_limit =
                (inner.map.len() as f64) > (self.max_size as f64) * CRITICAL_EXEMPTION_LIMIT;
            let victim = inner
                .map
                .iter()
                .filter(|(_, entry)| over_limit || entry.priority != Priority::Critical)
                .max_by(|a, b| {
                    let score_a = a.1.eviction_score(now, self.max_age);
                    let score_b = b.1.eviction_score(now, self.max_age);
                    score_a
                        .partial_cmp(&score_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                break;
            };
            if let Some(entry) = inner.map.remove(&key) {
                inner.bytes = inner.bytes.saturating_sub(entry.estimated_size);
                reclaimed = reclaimed.saturating_add(entry.estimated_size);
                self.stats.record_eviction();
            }
        }
        reclaimed
    }
}

fn effective_capacity(max_size: usize, factor: f64) -> usize {
    (((max_size as f64) * factor).floor() as usize).max(1)
}

impl<V> std::fmt::Debug for PriorityCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityCache")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .field("max_age", &self.max_age)
            .field("len", &self.len())
            .finish()
    }
}

impl<V> ManagedCache for PriorityCache<V>
where
    V: Send + 'static,
{
    fn name(&self) -> &str {
        self.name()
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn estimated_bytes(&self) -> u64 {
        self.estimated_bytes()
    }

    fn prune_expired(&self) -> u64 {
        self.prune_expired()
    }

    fn evict_down_to(&self, fraction: f64) -> u64 {
        self.evict_down_to(fraction)
    }

    fn set_capacity_factor(&self, factor: f64) {
        self.set_capacity_factor(factor)
    }

    fn clear_all(&self) {
        self.clear()
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
