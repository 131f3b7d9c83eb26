//! Allocation ledger
//!
//! Counts runtime allocations (cowns and behaviors) that are still live.
//! The leak detector consults it once the scheduler is quiescent.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct AllocationLedger {
    live_cowns: AtomicUsize,
    live_behaviors: AtomicUsize,
    cowns_allocated: AtomicU64,
    behaviors_allocated: AtomicU64,
}

/// Point-in-time copy of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerSnapshot {
    pub live_cowns: usize,
    pub live_behaviors: usize,
    pub cowns_allocated: u64,
    pub behaviors_allocated: u64,
}

impl LedgerSnapshot {
    pub fn live(&self) -> usize {
        self.live_cowns + self.live_behaviors
    }
}

impl AllocationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cown_allocated(&self) {
        self.live_cowns.fetch_add(1, Ordering::AcqRel);
        self.cowns_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cown_freed(&self) {
        let prev = self.live_cowns.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "cown freed twice");
    }

    pub(crate) fn behavior_allocated(&self) {
        self.live_behaviors.fetch_add(1, Ordering::AcqRel);
        self.behaviors_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn behavior_freed(&self) {
        let prev = self.live_behaviors.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "behavior freed twice");
    }

    /// Allocations belonging to this runtime that have not been released
    pub fn live(&self) -> usize {
        self.live_cowns.load(Ordering::Acquire) + self.live_behaviors.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            live_cowns: self.live_cowns.load(Ordering::Acquire),
            live_behaviors: self.live_behaviors.load(Ordering::Acquire),
            cowns_allocated: self.cowns_allocated.load(Ordering::Relaxed),
            behaviors_allocated: self.behaviors_allocated.load(Ordering::Relaxed),
        }
    }
}
