//! Flight recorder
//!
//! Bounded ring buffer of the most recent diagnostic lines. When full, the
//! oldest entry is evicted. Dumping drains the buffer.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// One recorded diagnostic line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightRecord {
    /// Monotonic sequence number, unique per recorder
    pub seq: u64,
    /// Name of the thread that produced the line
    pub thread: String,
    pub line: String,
}

#[derive(Debug)]
pub struct FlightRecorder {
    capacity: usize,
    entries: Mutex<VecDeque<FlightRecord>>,
    next_seq: AtomicU64,
    evicted: AtomicU64,
}

impl FlightRecorder {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            next_seq: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a line, evicting the oldest entry when full
    pub fn record(&self, line: impl Into<String>) {
        let thread = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        let record = FlightRecord {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            thread,
            line: line.into(),
        };

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(record);
    }

    /// Copy of the buffered records, oldest first
    pub fn snapshot(&self) -> Vec<FlightRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Remove and return the buffered records, oldest first
    pub fn drain(&self) -> Vec<FlightRecord> {
        self.entries.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Total records dropped because the buffer was full
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}
