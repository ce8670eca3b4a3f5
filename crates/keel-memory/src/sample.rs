use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// A raw reading produced by a [`MemorySource`].
///
/// `heap_used`/`heap_total` describe the allocator's view where available;
/// `rss` is the OS-reported resident set. Any field a source cannot observe
/// is reported as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub heap_used: u64,
    pub heap_total: u64,
    pub rss: u64,
}

impl MemoryReading {
    /// The usage value pressure is classified against.
    ///
    /// RSS is incorporated as an upper bound over self-reported heap usage,
    /// so allocator slack the heap counters miss still counts.
    pub fn effective_usage(&self) -> u64 {
        self.heap_used.max(self.rss)
    }
}

/// A reading plus the instant it was taken. Immutable once recorded.
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    pub reading: MemoryReading,
    pub taken_at: Instant,
}

impl MemorySample {
    pub fn new(reading: MemoryReading) -> Self {
        Self {
            reading,
            taken_at: Instant::now(),
        }
    }

    pub fn effective_usage(&self) -> u64 {
        self.reading.effective_usage()
    }
}

/// Where memory readings come from.
///
/// The production implementation is [`crate::ProcSource`]; tests substitute
/// scripted sources that replay a fixed sequence of readings.
pub trait MemorySource: Send {
    /// Take one reading. `None` means the source could not observe the
    /// process this round; callers skip the tick rather than fail.
    fn sample(&mut self) -> Option<MemoryReading>;
}

/// Bounded ring of recent samples, oldest dropped first.
#[derive(Debug)]
pub struct SampleHistory {
    samples: VecDeque<MemorySample>,
    capacity: usize,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, sample: MemorySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&MemorySample> {
        self.samples.back()
    }

    /// The most recent `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &MemorySample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrink the retained window to at most `n` samples (keeps the newest).
    pub fn trim_to(&mut self, n: usize) {
        while self.samples.len() > n {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
