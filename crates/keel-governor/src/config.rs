use keel_memory::{system_memory_bytes, PressureThresholds};
use std::time::Duration;
use thiserror::Error;

/// Raised by [`GovernorConfig::validate`] for settings that would leave the
/// governor unable to make progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} must be nonzero")]
    ZeroDuration { name: &'static str },
    #[error("{name} must be at least 1")]
    ZeroCount { name: &'static str },
}

/// Tunables for a [`crate::Governor`].
///
/// `Default` targets a fixed simulated ceiling (see
/// [`PressureThresholds::default`]) so behavior is identical on every host;
/// [`GovernorConfig::default_for_system`] derives thresholds from detected
/// physical memory instead.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub thresholds: PressureThresholds,
    /// Period of the memory sampling loop.
    pub sample_interval: Duration,
    /// Period of the remediation loop (grace/countdown checks, ladder re-runs).
    pub remediation_interval: Duration,
    /// Bound on the retained sample history.
    pub history_capacity: usize,
    /// Consecutive sub-warning samples required before leaving degraded or
    /// emergency state.
    pub recovery_samples: u32,
    /// How long pressure may sit at critical after cleanup before degraded
    /// mode escalates to emergency shutdown.
    pub critical_grace: Duration,
    /// How long emergency remediation gets before the governor declares the
    /// situation unrecoverable.
    pub emergency_countdown: Duration,
    /// Concurrency ceiling for admitted operations; halved in degraded mode.
    pub max_concurrent_operations: usize,
    /// Bound on the retained alert log.
    pub alert_capacity: usize,
    /// Capacity of the transition event channel. Sized generously; transition
    /// events must not be lost to receiver lag.
    pub event_channel_capacity: usize,
    /// Capacity of the raw per-tick sample channel. Small; slow receivers
    /// lose old ticks rather than slow the sampler.
    pub sample_channel_capacity: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            thresholds: PressureThresholds::default(),
            sample_interval: Duration::from_secs(5),
            remediation_interval: Duration::from_secs(1),
            history_capacity: 100,
            recovery_samples: 3,
            critical_grace: Duration::from_secs(5),
            emergency_countdown: Duration::from_secs(10),
            max_concurrent_operations: 5,
            alert_capacity: 64,
            event_channel_capacity: 256,
            sample_channel_capacity: 16,
        }
    }
}

impl GovernorConfig {
    /// Defaults with thresholds at 60/80/95% of this machine's physical
    /// memory; falls back to the simulated ceiling when detection fails.
    pub fn default_for_system() -> Self {
        let mut config = Self::default();
        if let Some(total) = system_memory_bytes() {
            if let Ok(thresholds) = PressureThresholds::fractions_of(total) {
                config.thresholds = thresholds;
            }
        }
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "sample_interval",
            });
        }
        if self.remediation_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "remediation_interval",
            });
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::ZeroCount {
                name: "history_capacity",
            });
        }
        if self.recovery_samples == 0 {
            return Err(ConfigError::ZeroCount {
                name: "recovery_samples",
            });
        }
        if self.max_concurrent_operations == 0 {
            return Err(ConfigError::ZeroCount {
                name: "max_concurrent_operations",
            });
        }
        if self.alert_capacity == 0 {
            return Err(ConfigError::ZeroCount {
                name: "alert_capacity",
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::ZeroCount {
                name: "event_channel_capacity",
            });
        }
        if self.sample_channel_capacity == 0 {
            return Err(ConfigError::ZeroCount {
                name: "sample_channel_capacity",
            });
        }
        Ok(())
    }
}
