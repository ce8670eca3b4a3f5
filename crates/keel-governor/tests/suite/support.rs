use std::collections::VecDeque;
use std::time::Duration;

use keel_governor::{
    EventReceiver, Governor, GovernorConfig, GovernorEvent, MemoryReading, MemorySource,
    PressureThresholds,
};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::TryRecvError;

/// Simulated ceiling used across the suite: warning at 600, critical at 800,
/// emergency at 950 bytes.
pub fn test_thresholds() -> PressureThresholds {
    PressureThresholds::new(600, 800, 950).expect("test thresholds are monotonic")
}

pub fn reading(bytes: u64) -> MemoryReading {
    MemoryReading {
        heap_used: bytes,
        heap_total: 1000,
        rss: bytes,
    }
}

/// Replays a fixed sequence of usages, then reports no reading.
pub struct ScriptedSource {
    readings: VecDeque<MemoryReading>,
}

impl ScriptedSource {
    pub fn new(usages: &[u64]) -> Self {
        Self {
            readings: usages.iter().copied().map(reading).collect(),
        }
    }
}

impl MemorySource for ScriptedSource {
    fn sample(&mut self) -> Option<MemoryReading> {
        self.readings.pop_front()
    }
}

/// Reports the same usage forever; used by the timer-driven tests.
pub struct RepeatingSource(pub u64);

impl MemorySource for RepeatingSource {
    fn sample(&mut self) -> Option<MemoryReading> {
        Some(reading(self.0))
    }
}

/// Short intervals and windows so the real-time tests finish quickly.
pub fn test_config() -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config.thresholds = test_thresholds();
    config.sample_interval = Duration::from_millis(10);
    config.remediation_interval = Duration::from_millis(10);
    config.recovery_samples = 3;
    config.critical_grace = Duration::from_millis(50);
    config.emergency_countdown = Duration::from_millis(50);
    config.max_concurrent_operations = 5;
    config
}

/// Governor over a scripted source, driven manually via `poll_sample`.
pub fn governor_with(usages: &[u64]) -> Governor {
    governor_with_config(test_config(), usages)
}

pub fn governor_with_config(config: GovernorConfig, usages: &[u64]) -> Governor {
    Governor::with_memory_source(
        config,
        Box::new(ScriptedSource::new(usages)),
        Handle::current(),
    )
    .expect("test config is valid")
}

/// Pull everything currently buffered on an event receiver.
pub fn drain_events(rx: &mut EventReceiver) -> Vec<GovernorEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

/// Route governor logs through the test writer; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("keel=debug")
        .with_test_writer()
        .try_init();
}
