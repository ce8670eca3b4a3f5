//! Memory sampling, pressure classification and trend estimation for Keel.
//!
//! This crate is intentionally lightweight and "best-effort":
//! - Samples are coarse snapshots of process memory, not precise accounting.
//! - Classification is a pure function of a usage value against byte
//!   thresholds, so callers can drive it from timers or from scripted
//!   readings in tests.
//! - Everything here is synchronous; the async plumbing lives in the
//!   governor crate.

mod pressure;
mod process;
mod reclaim;
mod sample;
mod trend;

pub use pressure::{PressureLevel, PressureThresholds, ThresholdError};
pub use process::{current_rss_bytes, system_memory_bytes, ProcSource};
pub use reclaim::force_reclaim;
pub use sample::{MemoryReading, MemorySample, MemorySource, SampleHistory};
pub use trend::{adjusted_projection, growth_rate, remediation_allowance, risk_score};

/// Number of bytes in a mebibyte.
pub const MB: u64 = 1024 * 1024;
/// Number of bytes in a gibibyte.
pub const GB: u64 = 1024 * MB;
