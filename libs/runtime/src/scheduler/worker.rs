//! Worker thread logic.
//!
//! Workers share one MPMC run-queue and block on it when idle. The worker
//! whose completion brings the outstanding-work counter to zero broadcasts
//! one [`Task::Stop`] per worker.

use super::Shared;
use crate::behavior::BehaviorCore;

use crossbeam_channel::Receiver;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Run-queue entry
#[derive(Debug)]
pub(crate) enum Task {
    Run(Arc<BehaviorCore>),
    Stop,
}

/// Identifier for a scheduler worker.
pub type WorkerId = usize;

pub(crate) struct Worker {
    id: WorkerId,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    /// Wait for the go signal, then run the scheduling loop.
    ///
    /// A closed start channel means startup was aborted.
    pub(crate) fn start(self, go: Receiver<()>) {
        if go.recv().is_err() {
            debug!(worker = self.id, "Worker startup aborted");
            return;
        }
        self.run_loop();
    }

    fn run_loop(&self) {
        self.shared
            .diagnostics
            .line(format_args!("worker {} start", self.id));
        debug!(worker = self.id, "Worker started");

        let mut executed = 0u64;
        loop {
            match self.shared.queue_rx.recv() {
                Ok(Task::Run(behavior)) => {
                    self.execute(behavior);
                    executed += 1;
                }
                Ok(Task::Stop) | Err(_) => break,
            }
        }

        self.shared
            .diagnostics
            .line(format_args!("worker {} stop", self.id));
        debug!(worker = self.id, executed, "Worker stopped");
    }

    fn execute(&self, behavior: Arc<BehaviorCore>) {
        let behavior_id = behavior.id();
        let started = Instant::now();

        // The behavior may hold the last reference to a cown, so its drop
        // can run a user destructor; that panic is caught here too.
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || behavior.run()))
            .unwrap_or_else(Err);

        let panicked = outcome.is_err();
        self.shared
            .metrics
            .record_completed(started.elapsed(), panicked);
        if let Err(payload) = outcome {
            error!(
                worker = self.id,
                behavior = behavior_id,
                "Behavior or cown destructor panicked; re-raised after quiescence"
            );
            self.shared.record_panic(payload);
        }

        self.shared.work_completed();
    }
}
