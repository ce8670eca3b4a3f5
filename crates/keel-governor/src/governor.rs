use crate::alerts::{AlertLog, AlertRecord};
use crate::caches::CacheRegistry;
use crate::cleanup::{
    CleanupRegistry, CleanupStrategy, ClearCaches, EvictColdEntries, ForceReclaim,
    PruneExpiredEntries, TrimSampleHistory,
};
use crate::config::{ConfigError, GovernorConfig};
use crate::counters::{Counters, CountersSnapshot};
use crate::events::{EventReceiver, EventSender, SampleEvent, SampleReceiver};
use crate::guardian::{
    AdmissionOutcome, AdmitDecision, Guardian, GuardianActions, GuardianState, OperationId,
    OperationRequest,
};
use keel_cache::PriorityCache;
use keel_memory::{
    growth_rate, risk_score, MemoryReading, MemorySample, MemorySource, PressureLevel, ProcSource,
    SampleHistory,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cache `{name}` already exists with a different value type")]
    MismatchedCacheType { name: String },
}

/// Read-only snapshot of the governor for display by host code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: GuardianState,
    pub pressure_level: PressureLevel,
    pub active_operation_count: usize,
    pub recent_alerts: Vec<AlertRecord>,
    pub counters: CountersSnapshot,
}

/// How many alerts a status snapshot carries.
const STATUS_ALERT_WINDOW: usize = 10;

fn build_runtime() -> Runtime {
    // The governor only needs timers; one worker is plenty. Thread creation
    // can fail in constrained CI/sandbox environments, so fall back to a
    // current-thread runtime instead of crashing during startup.
    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_time()
        .thread_name("keel-governor")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap_or_else(|_| panic!("failed to build governor runtime: {err}")),
    }
}

struct GovernorInner {
    config: GovernorConfig,
    source: Mutex<Box<dyn MemorySource>>,
    history: Arc<Mutex<SampleHistory>>,
    caches: Arc<CacheRegistry>,
    cleanup: CleanupRegistry,
    guardian: Guardian,
    alerts: AlertLog,
    events: EventSender,
    counters: Arc<Counters>,
    /// Serializes sampling ticks; a tick due while one is still running is
    /// skipped rather than queued.
    tick_guard: Mutex<()>,
    /// Owned runtime when the governor built its own; `None` when running on
    /// a caller-supplied handle.
    runtime: Option<Runtime>,
    handle: Handle,
    shutdown: CancellationToken,
    started: AtomicBool,
    stopped: AtomicBool,
}

/// The process-wide memory governor.
///
/// Cheap to clone; clones share one instance. Construct once at process
/// start and hand clones to the components that need admission decisions or
/// named caches.
#[derive(Clone)]
pub struct Governor {
    inner: Arc<GovernorInner>,
}

impl Governor {
    /// Build a governor that owns its background runtime and samples the
    /// current process.
    pub fn new(config: GovernorConfig) -> Result<Self, GovernorError> {
        let runtime = build_runtime();
        let handle = runtime.handle().clone();
        Self::build(config, Box::new(ProcSource::new()), Some(runtime), handle)
    }

    /// Build a governor that runs its loops on the caller's runtime.
    pub fn with_runtime_handle(
        config: GovernorConfig,
        handle: Handle,
    ) -> Result<Self, GovernorError> {
        Self::build(config, Box::new(ProcSource::new()), None, handle)
    }

    /// Build a governor over a caller-supplied memory source; used by hosts
    /// with their own usage accounting and by tests with scripted readings.
    pub fn with_memory_source(
        config: GovernorConfig,
        source: Box<dyn MemorySource>,
        handle: Handle,
    ) -> Result<Self, GovernorError> {
        Self::build(config, source, None, handle)
    }

    fn build(
        config: GovernorConfig,
        source: Box<dyn MemorySource>,
        runtime: Option<Runtime>,
        handle: Handle,
    ) -> Result<Self, GovernorError> {
        config.validate()?;
        let events = EventSender::new(
            config.event_channel_capacity,
            config.sample_channel_capacity,
        );
        let counters = Arc::new(Counters::default());
        let history = Arc::new(Mutex::new(SampleHistory::new(config.history_capacity)));
        let caches = Arc::new(CacheRegistry::new());
        let guardian = Guardian::new(&config, events.clone(), counters.clone());
        let alerts = AlertLog::new(config.alert_capacity);

        let cleanup = CleanupRegistry::new();
        cleanup.register(Arc::new(PruneExpiredEntries::new(caches.clone())));
        cleanup.register(Arc::new(TrimSampleHistory::new(history.clone())));
        cleanup.register(Arc::new(EvictColdEntries::new(caches.clone())));
        cleanup.register(Arc::new(ClearCaches::new(caches.clone())));
        cleanup.register(Arc::new(ForceReclaim));

        Ok(Self {
            inner: Arc::new(GovernorInner {
                config,
                source: Mutex::new(source),
                history,
                caches,
                cleanup,
                guardian,
                alerts,
                events,
                counters,
                tick_guard: Mutex::new(()),
                runtime,
                handle,
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Start the sampling and remediation loops. Idempotent.
    pub fn initialize(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            target = "keel.governor",
            sample_interval_ms = self.inner.config.sample_interval.as_millis() as u64,
            remediation_interval_ms = self.inner.config.remediation_interval.as_millis() as u64,
            "governor started"
        );
        self.spawn_loop(self.inner.config.sample_interval, GovernorInner::poll_sample);
        self.spawn_loop(
            self.inner.config.remediation_interval,
            GovernorInner::poll_remediation,
        );
    }

    fn spawn_loop(&self, period: Duration, poll: fn(&GovernorInner)) {
        let weak = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown.clone();
        self.inner.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                poll(&inner);
            }
        });
    }

    /// Stop both loops and release every tracked operation. Idempotent; no
    /// background work survives a completed shutdown.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        let drained = self.inner.guardian.release_all();
        if drained > 0 {
            self.inner.counters.add_force_released(drained as u64);
        }
        tracing::info!(
            target = "keel.governor",
            drained_operations = drained,
            "governor shut down"
        );
    }

    /// Decide whether `request` may proceed. Synchronous and non-blocking.
    ///
    /// Admitted operations are tracked until [`Governor::release`] or, when
    /// the request carries a deadline, until the deadline force-releases
    /// them.
    pub fn admit(&self, request: OperationRequest) -> AdmissionOutcome {
        match self.inner.guardian.admit(&request) {
            AdmitDecision::Admitted { token } => {
                self.inner.counters.record_admitted();
                if let Some(deadline) = request.deadline {
                    self.spawn_deadline(request.id, deadline, token);
                }
                AdmissionOutcome::Admitted
            }
            AdmitDecision::Rejected { reason } => {
                self.inner.counters.record_rejected();
                AdmissionOutcome::Rejected { reason }
            }
        }
    }

    fn spawn_deadline(&self, id: OperationId, deadline: Duration, token: CancellationToken) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    if let Some(inner) = weak.upgrade() {
                        if inner.guardian.release(id) {
                            inner.counters.add_force_released(1);
                            tracing::debug!(
                                target = "keel.governor",
                                id = %id,
                                "operation deadline expired; force-released"
                            );
                        }
                    }
                }
            }
        });
    }

    /// Stop tracking an admitted operation. Idempotent on unknown ids.
    pub fn release(&self, id: OperationId) {
        if self.inner.guardian.release(id) {
            self.inner.counters.record_released();
        }
    }

    /// Get or create the named cache. Caches are governed: degraded mode
    /// shrinks them and cleanup strategies prune, evict from and clear them.
    pub fn cache<V>(
        &self,
        name: &str,
        max_size: usize,
        max_age: Duration,
    ) -> Result<Arc<PriorityCache<V>>, GovernorError>
    where
        V: Send + 'static,
    {
        self.inner.caches.get_or_create(name, max_size, max_age)
    }

    /// Add or replace a cleanup strategy in the remediation ladder.
    pub fn register_cleanup_strategy(&self, strategy: Arc<dyn CleanupStrategy>) {
        self.inner.cleanup.register(strategy);
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.inner.guardian.state(),
            pressure_level: self.inner.guardian.pressure(),
            active_operation_count: self.inner.guardian.active_operations(),
            recent_alerts: self.inner.alerts.recent(STATUS_ALERT_WINDOW),
            counters: self.inner.counters.snapshot(),
        }
    }

    /// Subscribe to control-plane events (transitions, rejections, the
    /// unrecoverable signal).
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Subscribe to raw per-tick samples. Lossy under receiver lag.
    pub fn subscribe_samples(&self) -> SampleReceiver {
        self.inner.events.subscribe_samples()
    }

    /// Run one sampling tick synchronously.
    ///
    /// The background loop calls this on a timer; hosts that prefer to drive
    /// sampling themselves may call it instead of `initialize`.
    pub fn poll_sample(&self) {
        self.inner.poll_sample();
    }

    /// Run one remediation pass synchronously (grace/countdown checks plus a
    /// ladder re-run while pressure stays elevated).
    pub fn poll_remediation(&self) {
        self.inner.poll_remediation();
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("state", &self.inner.guardian.state())
            .field("pressure", &self.inner.guardian.pressure())
            .field("caches", &self.inner.caches.len())
            .finish()
    }
}

impl GovernorInner {
    fn poll_sample(&self) {
        let Some(_tick) = self.tick_guard.try_lock() else {
            self.counters.record_skipped_tick();
            tracing::debug!(
                target = "keel.governor",
                "previous sampling tick still running; skipping"
            );
            return;
        };
        self.counters.record_tick();

        let reading = self.source.lock().sample();
        let Some(reading) = reading else {
            tracing::debug!(target = "keel.governor", "memory source returned no reading");
            return;
        };

        let (level, usage, risk) = {
            let mut history = self.history.lock();
            history.push(MemorySample::new(reading));
            let usage = reading.effective_usage();
            let level = self.config.thresholds.level_for(usage);
            let risk = risk_score(growth_rate(&history));
            (level, usage, risk)
        };

        self.events.emit_sample(SampleEvent { reading, level });
        let actions = self.guardian.observe(level, usage, risk);
        self.apply_actions(&actions, reading);
    }

    fn poll_remediation(&self) {
        let actions = self.guardian.evaluate_timers();
        let reading = self.latest_reading();
        self.apply_actions(&actions, reading);

        // While pressure stays elevated, keep re-running the ladder so
        // remediation converges instead of firing once per transition.
        if actions.run_cleanup.is_none() {
            let level = self.guardian.pressure();
            if level >= PressureLevel::Warning {
                self.run_cleanup(level, reading);
            }
        }
    }

    fn latest_reading(&self) -> MemoryReading {
        self.history
            .lock()
            .latest()
            .map(|sample| sample.reading)
            .unwrap_or_default()
    }

    /// Perform the side effects of a guardian update. Runs without any
    /// guardian lock held; capacity changes land before the ladder so
    /// eviction sees the shrunken limits.
    fn apply_actions(&self, actions: &GuardianActions, reading: MemoryReading) {
        if let Some(factor) = actions.set_capacity_factor {
            self.caches.set_capacity_factor_all(factor);
        }

        if let Some((previous, level)) = actions.transition {
            let message = if level > previous {
                format!("memory pressure rose to {level}")
            } else {
                format!("memory pressure eased to {level}")
            };
            self.alerts.record(AlertRecord::new(
                level,
                message,
                reading,
                self.cleanup.recommended_for(level),
            ));
            tracing::info!(
                target = "keel.governor",
                previous = %previous,
                level = %level,
                usage_bytes = reading.effective_usage(),
                "pressure level changed"
            );
        }
        if actions.entered_emergency {
            self.alerts.record(AlertRecord::new(
                PressureLevel::Emergency,
                "entering emergency shutdown; non-critical operations cancelled",
                reading,
                self.cleanup.recommended_for(PressureLevel::Emergency),
            ));
        }
        if actions.recovered {
            self.alerts.record(AlertRecord::new(
                PressureLevel::Normal,
                "pressure settled; normal operation restored",
                reading,
                Vec::new(),
            ));
        }
        if actions.unrecoverable {
            self.alerts.record(AlertRecord::new(
                PressureLevel::Emergency,
                "pressure still critical after emergency remediation; restart recommended",
                reading,
                Vec::new(),
            ));
        }

        if let Some(level) = actions.run_cleanup {
            self.run_cleanup(level, reading);
        }
    }

    fn run_cleanup(&self, level: PressureLevel, reading: MemoryReading) {
        let outcome = self.cleanup.run_for(level);
        for (name, error) in &outcome.failures {
            self.alerts.record(AlertRecord::new(
                level,
                format!("cleanup strategy `{name}` failed: {error}"),
                reading,
                Vec::new(),
            ));
        }
        if !outcome.executed.is_empty() {
            tracing::debug!(
                target = "keel.governor",
                level = %level,
                strategies = outcome.executed.len(),
                reclaimed_bytes = outcome.reclaimed_bytes,
                "cleanup ladder finished"
            );
        }
    }
}

impl Drop for GovernorInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
