use keel_memory::{MemoryReading, PressureLevel};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::SystemTime;

/// Diagnostic record of a pressure transition or a remediation problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub level: PressureLevel,
    pub message: String,
    pub reading: MemoryReading,
    /// Names of the cleanup strategies that apply at this level.
    pub recommended_actions: Vec<String>,
    pub at: SystemTime,
}

impl AlertRecord {
    pub fn new(
        level: PressureLevel,
        message: impl Into<String>,
        reading: MemoryReading,
        recommended_actions: Vec<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            reading,
            recommended_actions,
            at: SystemTime::now(),
        }
    }
}

/// Append-only bounded alert history; the oldest records are trimmed.
#[derive(Debug)]
pub struct AlertLog {
    records: Mutex<VecDeque<AlertRecord>>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, record: AlertRecord) {
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// The most recent `n` alerts, oldest first.
    pub fn recent(&self, n: usize) -> Vec<AlertRecord> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}
