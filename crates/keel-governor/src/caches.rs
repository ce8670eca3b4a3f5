use crate::governor::GovernorError;
use keel_cache::{ManagedCache, PriorityCache};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct RegistryInner {
    caches: HashMap<String, Arc<dyn ManagedCache>>,
    capacity_factor: f64,
}

/// Named-cache registry driven by the governor's maintenance passes.
pub(crate) struct CacheRegistry {
    inner: Mutex<RegistryInner>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                caches: HashMap::new(),
                capacity_factor: 1.0,
            }),
        }
    }

    /// Get or create the cache registered under `name`.
    ///
    /// Re-requesting an existing name with a different value type is an
    /// error; with different bounds, the existing cache wins.
    pub fn get_or_create<V>(
        &self,
        name: &str,
        max_size: usize,
        max_age: Duration,
    ) -> Result<Arc<PriorityCache<V>>, GovernorError>
    where
        V: Send + 'static,
    {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.caches.get(name) {
            let existing = existing.clone();
            drop(inner);
            return existing
                .as_any_arc()
                .downcast::<PriorityCache<V>>()
                .map_err(|_| GovernorError::MismatchedCacheType {
                    name: name.to_string(),
                })
                .map(|cache| {
                    if cache.max_size() != max_size || cache.max_age() != max_age {
                        tracing::debug!(
                            target = "keel.governor",
                            cache = name,
                            "cache already exists; requested bounds ignored"
                        );
                    }
                    cache
                });
        }
        let cache = Arc::new(PriorityCache::new(name, max_size, max_age));
        // Caches created while degraded inherit the current shrink.
        cache.set_capacity_factor(inner.capacity_factor);
        inner
            .caches
            .insert(name.to_string(), cache.clone() as Arc<dyn ManagedCache>);
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().caches.len()
    }

    /// Snapshot the registered caches so maintenance runs without holding
    /// the registry lock.
    fn snapshot(&self) -> Vec<Arc<dyn ManagedCache>> {
        self.inner.lock().caches.values().cloned().collect()
    }

    pub fn prune_expired_all(&self) -> u64 {
        self.snapshot()
            .iter()
            .map(|cache| cache.prune_expired())
            .sum()
    }

    pub fn evict_all_down_to(&self, fraction: f64) -> u64 {
        self.snapshot()
            .iter()
            .map(|cache| cache.evict_down_to(fraction))
            .sum()
    }

    pub fn clear_all(&self) -> u64 {
        let mut reclaimed = 0u64;
        for cache in self.snapshot() {
            reclaimed = reclaimed.saturating_add(cache.estimated_bytes());
            cache.clear_all();
        }
        reclaimed
    }

    pub fn set_capacity_factor_all(&self, factor: f64) {
        let caches = {
            let mut inner = self.inner.lock();
            inner.capacity_factor = factor;
            inner.caches.values().cloned().collect::<Vec<_>>()
        };
        for cache in caches {
            cache.set_capacity_factor(factor);
        }
    }
}
