//! Scheduler metrics
//!
//! Relaxed atomic counters updated by workers, read as a snapshot.

use crate::diagnostics::LedgerSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub behaviors_scheduled: AtomicU64,
    pub behaviors_completed: AtomicU64,
    pub behaviors_panicked: AtomicU64,
    pub total_run_time_ns: AtomicU64,
    pub runs: AtomicU64,
}

impl SchedulerMetrics {
    pub fn record_scheduled(&self) {
        self.behaviors_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, duration: Duration, panicked: bool) {
        self.behaviors_completed.fetch_add(1, Ordering::Relaxed);
        self.total_run_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        if panicked {
            self.behaviors_panicked.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_run_time_ns(&self) -> f64 {
        let count = self.behaviors_completed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_run_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    pub fn snapshot(&self, allocations: LedgerSnapshot) -> SchedulerStats {
        SchedulerStats {
            behaviors_scheduled: self.behaviors_scheduled.load(Ordering::Relaxed),
            behaviors_completed: self.behaviors_completed.load(Ordering::Relaxed),
            behaviors_panicked: self.behaviors_panicked.load(Ordering::Relaxed),
            avg_run_time_ns: self.avg_run_time_ns(),
            runs: self.runs.load(Ordering::Relaxed),
            allocations,
        }
    }
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub behaviors_scheduled: u64,
    pub behaviors_completed: u64,
    pub behaviors_panicked: u64,
    pub avg_run_time_ns: f64,
    /// Completed `run()` calls
    pub runs: u64,
    pub allocations: LedgerSnapshot,
}
