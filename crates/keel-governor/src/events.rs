use crate::guardian::{OperationId, RejectReason};
use keel_cache::Priority;
use keel_memory::{MemoryReading, PressureLevel};
use serde::Serialize;
use tokio::sync::broadcast;

/// Control-plane notifications emitted by the governor.
///
/// These ride a broadcast channel sized so transitions are not lost to
/// receiver lag in practice; every level change produces exactly one
/// `PressureChanged`, never coalesced with its neighbors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorEvent {
    PressureChanged {
        previous: PressureLevel,
        level: PressureLevel,
        usage_bytes: u64,
    },
    DegradedEntered {
        level: PressureLevel,
    },
    DegradedExited,
    OperationRejected {
        id: OperationId,
        priority: Priority,
        reason: RejectReason,
    },
    EmergencyUnrecoverable {
        usage_bytes: u64,
    },
}

/// One raw reading per processed sampling tick.
///
/// Sample events use a deliberately small channel; a slow receiver loses old
/// ticks rather than slowing the sampler down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleEvent {
    pub reading: MemoryReading,
    pub level: PressureLevel,
}

pub type EventReceiver = broadcast::Receiver<GovernorEvent>;
pub type SampleReceiver = broadcast::Receiver<SampleEvent>;

#[derive(Clone)]
pub(crate) struct EventSender {
    events_tx: broadcast::Sender<GovernorEvent>,
    samples_tx: broadcast::Sender<SampleEvent>,
}

impl EventSender {
    pub fn new(event_capacity: usize, sample_capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(event_capacity.max(1));
        let (samples_tx, _) = broadcast::channel(sample_capacity.max(1));
        Self {
            events_tx,
            samples_tx,
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events_tx.subscribe()
    }

    pub fn subscribe_samples(&self) -> SampleReceiver {
        self.samples_tx.subscribe()
    }

    pub fn emit(&self, event: GovernorEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn emit_sample(&self, event: SampleEvent) {
        let _ = self.samples_tx.send(event);
    }
}
