use crate::caches::CacheRegistry;
use keel_memory::{force_reclaim, PressureLevel, SampleHistory};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// A remediation step the governor runs when pressure rises.
///
/// Implementations must be idempotent: the ladder re-runs on every
/// remediation tick while pressure stays elevated. `execute` must not assume
/// any governor lock is held and must not block on I/O for long.
pub trait CleanupStrategy: Send + Sync {
    fn name(&self) -> &str;
    /// Higher priority runs earlier.
    fn priority(&self) -> u32;
    /// Aggressive strategies trade cached state for memory; they are held
    /// back until pressure reaches critical.
    fn aggressive(&self) -> bool;
    /// Returns a best-effort estimate of bytes reclaimed.
    fn execute(&self) -> Result<u64, CleanupError>;
}

/// Failure of an individual cleanup strategy. Never propagates past the
/// registry; the run continues with the remaining strategies.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CleanupError {
    message: String,
}

impl CleanupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CleanupOutcome {
    pub reclaimed_bytes: u64,
    pub executed: Vec<String>,
    pub failures: Vec<(String, CleanupError)>,
}

/// Registry of cleanup strategies with per-level selection.
///
/// Warning runs the top two non-aggressive strategies, critical the top
/// three regardless of aggressiveness, emergency all of them; always in
/// descending priority order.
pub(crate) struct CleanupRegistry {
    strategies: Mutex<Vec<Arc<dyn CleanupStrategy>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self {
            strategies: Mutex::new(Vec::new()),
        }
    }

    /// Register a strategy; a strategy with the same name replaces the
    /// existing registration.
    pub fn register(&self, strategy: Arc<dyn CleanupStrategy>) {
        let mut strategies = self.strategies.lock();
        if let Some(existing) = strategies
            .iter_mut()
            .find(|existing| existing.name() == strategy.name())
        {
            *existing = strategy;
        } else {
            strategies.push(strategy);
        }
    }

    fn selected_for(&self, level: PressureLevel) -> Vec<Arc<dyn CleanupStrategy>> {
        let mut all: Vec<Arc<dyn CleanupStrategy>> = self.strategies.lock().clone();
        all.sort_by(|a, b| b.priority().cmp(&a.priority()).then_with(|| a.name().cmp(b.name())));
        match level {
            PressureLevel::Normal => Vec::new(),
            PressureLevel::Warning => all
                .into_iter()
                .filter(|strategy| !strategy.aggressive())
                .take(2)
                .collect(),
            PressureLevel::Critical => all.into_iter().take(3).collect(),
            PressureLevel::Emergency => all,
        }
    }

    /// Strategy names that would run at `level`, in execution order.
    pub fn recommended_for(&self, level: PressureLevel) -> Vec<String> {
        self.selected_for(level)
            .iter()
            .map(|strategy| strategy.name().to_string())
            .collect()
    }

    /// Run the ladder for `level`. Individual failures are collected, not
    /// propagated; the remaining strategies still run.
    pub fn run_for(&self, level: PressureLevel) -> CleanupOutcome {
        let mut outcome = CleanupOutcome::default();
        for strategy in self.selected_for(level) {
            let name = strategy.name().to_string();
            match strategy.execute() {
                Ok(bytes) => {
                    tracing::debug!(
                        target = "keel.governor",
                        strategy = %name,
                        reclaimed_bytes = bytes,
                        "cleanup strategy finished"
                    );
                    outcome.reclaimed_bytes = outcome.reclaimed_bytes.saturating_add(bytes);
                    outcome.executed.push(name);
                }
                Err(err) => {
                    tracing::warn!(
                        target = "keel.governor",
                        strategy = %name,
                        error = %err,
                        "cleanup strategy failed"
                    );
                    outcome.failures.push((name, err));
                }
            }
        }
        outcome
    }
}

/// Prune expired entries from every registered cache.
pub(crate) struct PruneExpiredEntries {
    caches: Arc<CacheRegistry>,
}

impl PruneExpiredEntries {
    pub fn new(caches: Arc<CacheRegistry>) -> Self {
        Self { caches }
    }
}

impl CleanupStrategy for PruneExpiredEntries {
    fn name(&self) -> &str {
        "prune-expired-entries"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn aggressive(&self) -> bool {
        false
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        Ok(self.caches.prune_expired_all())
    }
}

/// Shrink the retained sample history to half its capacity.
pub(crate) struct TrimSampleHistory {
    history: Arc<Mutex<SampleHistory>>,
}

impl TrimSampleHistory {
    pub fn new(history: Arc<Mutex<SampleHistory>>) -> Self {
        Self { history }
    }
}

impl CleanupStrategy for TrimSampleHistory {
    fn name(&self) -> &str {
        "trim-sample-history"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn aggressive(&self) -> bool {
        false
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        let mut history = self.history.lock();
        let before = history.len();
        let target = (history.capacity() / 2).max(1);
        history.trim_to(target);
        let dropped = before.saturating_sub(history.len());
        Ok((dropped * std::mem::size_of::<keel_memory::MemorySample>()) as u64)
    }
}

/// Evict every cache down to half its effective capacity.
pub(crate) struct EvictColdEntries {
    caches: Arc<CacheRegistry>,
}

impl EvictColdEntries {
    pub fn new(caches: Arc<CacheRegistry>) -> Self {
        Self { caches }
    }
}

impl CleanupStrategy for EvictColdEntries {
    fn name(&self) -> &str {
        "evict-cold-entries"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn aggressive(&self) -> bool {
        true
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        Ok(self.caches.evict_all_down_to(0.5))
    }
}

/// Drop every cached value.
pub(crate) struct ClearCaches {
    caches: Arc<CacheRegistry>,
}

impl ClearCaches {
    pub fn new(caches: Arc<CacheRegistry>) -> Self {
        Self { caches }
    }
}

impl CleanupStrategy for ClearCaches {
    fn name(&self) -> &str {
        "clear-caches"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn aggressive(&self) -> bool {
        true
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        Ok(self.caches.clear_all())
    }
}

/// Ask the allocator to hand freed pages back to the OS.
pub(crate) struct ForceReclaim;

impl CleanupStrategy for ForceReclaim {
    fn name(&self) -> &str {
        "force-reclaim"
    }

    fn priority(&self) -> u32 {
        5
    }

    fn aggressive(&self) -> bool {
        true
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        // No byte estimate; the allocator does not report how much it trimmed.
        force_reclaim();
        Ok(0)
    }
}
