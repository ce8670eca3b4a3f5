use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse-grained memory pressure levels, from calm to out-of-budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Warning => "warning",
            PressureLevel::Critical => "critical",
            PressureLevel::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Raised when thresholds are not strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThresholdError {
    #[error("warning threshold must be nonzero")]
    ZeroWarning,
    #[error("thresholds must satisfy warning < critical < emergency (got {warning} / {critical} / {emergency})")]
    NotMonotonic {
        warning: u64,
        critical: u64,
        emergency: u64,
    },
}

/// Absolute byte thresholds for computing [`PressureLevel`] from usage.
///
/// Thresholds are validated at construction; a usage value maps to exactly
/// one level (the highest threshold it meets or exceeds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureThresholds {
    /// Enter `Warning` when `usage >= warning`.
    warning: u64,
    /// Enter `Critical` when `usage >= critical`.
    critical: u64,
    /// Enter `Emergency` when `usage >= emergency`.
    emergency: u64,
}

impl Default for PressureThresholds {
    /// 60% / 80% / 95% of a 1 GiB simulated ceiling.
    ///
    /// Host-independent on purpose; deployments that want thresholds derived
    /// from physical memory go through [`PressureThresholds::fractions_of`].
    fn default() -> Self {
        const CEILING: u64 = crate::GB;
        Self {
            warning: CEILING / 5 * 3,
            critical: CEILING / 5 * 4,
            emergency: CEILING / 20 * 19,
        }
    }
}

impl PressureThresholds {
    pub fn new(warning: u64, critical: u64, emergency: u64) -> Result<Self, ThresholdError> {
        if warning == 0 {
            return Err(ThresholdError::ZeroWarning);
        }
        if !(warning < critical && critical < emergency) {
            return Err(ThresholdError::NotMonotonic {
                warning,
                critical,
                emergency,
            });
        }
        Ok(Self {
            warning,
            critical,
            emergency,
        })
    }

    /// Thresholds at 60% / 80% / 95% of `ceiling_bytes`.
    pub fn fractions_of(ceiling_bytes: u64) -> Result<Self, ThresholdError> {
        let frac = |f: f64| ((ceiling_bytes as f64) * f).round() as u64;
        Self::new(frac(0.60), frac(0.80), frac(0.95))
    }

    pub fn warning(&self) -> u64 {
        self.warning
    }

    pub fn critical(&self) -> u64 {
        self.critical
    }

    pub fn emergency(&self) -> u64 {
        self.emergency
    }

    pub fn level_for(&self, usage_bytes: u64) -> PressureLevel {
        if usage_bytes >= self.emergency {
            PressureLevel::Emergency
        } else if usage_bytes >= self.critical {
            PressureLevel::Critical
        } else if usage_bytes >= self.warning {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }
}
