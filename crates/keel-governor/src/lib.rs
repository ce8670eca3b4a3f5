//! Self-monitoring memory-pressure governor for long-running processes.
//!
//! The governor ties together the building blocks from `keel-memory` and
//! `keel-cache`: it samples process memory on a timer, classifies pressure
//! against byte thresholds, escalates through a ladder of cleanup strategies
//! as pressure rises, and gates new units of work through an admission
//! controller that weighs each operation's declared memory impact against
//! the current trend.
//!
//! Design ground rules:
//! - `admit`, `release` and cache reads/writes are synchronous and never
//!   block on I/O.
//! - Advisory failures (a cleanup strategy erroring, a sample that cannot be
//!   read) are logged and recorded as alerts; they never propagate.
//! - Rejections are ordinary outcomes, not errors. The only fatal signal is
//!   a single [`GovernorEvent::EmergencyUnrecoverable`] event; the governor
//!   never exits the process on the host's behalf.

mod alerts;
mod caches;
mod cleanup;
mod config;
mod counters;
mod events;
mod governor;
mod guardian;

pub use alerts::{AlertLog, AlertRecord};
pub use cleanup::{CleanupError, CleanupStrategy};
pub use config::{ConfigError, GovernorConfig};
pub use counters::CountersSnapshot;
pub use events::{EventReceiver, GovernorEvent, SampleEvent, SampleReceiver};
pub use governor::{Governor, GovernorError, StatusSnapshot};
pub use guardian::{AdmissionOutcome, GuardianState, OperationId, OperationRequest, RejectReason};

pub use keel_cache::{CacheStatsSnapshot, ManagedCache, Priority, PriorityCache};
pub use keel_memory::{
    MemoryReading, MemorySample, MemorySource, PressureLevel, PressureThresholds, ThresholdError,
};
