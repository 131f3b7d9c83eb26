//! Behavior Scheduler
//!
//! Fixed-size worker pool that executes runnable behaviors and stops at
//! quiescence. A [`Scheduler`] is a cheap handle onto shared state; every
//! cown remembers the scheduler it was allocated on, so scheduling a
//! behavior never needs an ambient global.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──initialize(n)──▶ Initialized ──run()──▶ Running ──quiescence──▶ Stopping ──join──▶ Stopped
//!                                       ▲                                                                │
//!                                       └───────────────────────── initialize(n) ────────────────────────┘
//! ```
//!
//! Behaviors may be scheduled while `Initialized` (they wait in the
//! run-queue until `run`) or `Running`. `run` returns once the
//! outstanding-work counter, incremented per submitted behavior and
//! decremented per completed behavior, reaches zero.
//!
//! The state and the counter share one atomic word, so accepting a behavior
//! and reaching quiescence are ordered against each other: once the counter
//! hits zero while `Running`, the scheduler is `Stopping` and every later
//! submission is refused.
//!
//! ## Example
//!
//! ```rust
//! use cown_runtime::{when, Cown, Scheduler};
//!
//! let scheduler = Scheduler::new();
//! scheduler.initialize(2).unwrap();
//!
//! let counter = Cown::new(&scheduler, 0u64);
//! when(&counter, |mut c| *c += 1).unwrap();
//! drop(counter);
//!
//! scheduler.run().unwrap();
//! assert_eq!(scheduler.stats().behaviors_completed, 1);
//! ```

mod metrics;
mod worker;

pub use metrics::{SchedulerMetrics, SchedulerStats};
pub use worker::WorkerId;

use crate::diagnostics::{AllocationLedger, Diagnostics};
use crate::error::{Result, RuntimeError};
use worker::{Task, Worker};

use crate::behavior::BehaviorCore;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use runtime_config::{defaults, RuntimeConfig};
use std::any::Any;
use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    /// Quiescent; workers are being joined.
    Stopping = 3,
    Stopped = 4,
}

impl SchedulerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SchedulerState::Uninitialized,
            1 => SchedulerState::Initialized,
            2 => SchedulerState::Running,
            3 => SchedulerState::Stopping,
            _ => SchedulerState::Stopped,
        }
    }

    /// Whether new behaviors may be submitted in this state
    pub fn is_accepting(&self) -> bool {
        matches!(self, SchedulerState::Initialized | SchedulerState::Running)
    }
}

const STATE_SHIFT: u32 = 56;
const COUNT_MASK: u64 = (1 << STATE_SHIFT) - 1;

/// Lifecycle state (high byte) and outstanding behaviors (low bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Control(u64);

impl Control {
    fn new(state: SchedulerState, outstanding: u64) -> Self {
        Self(((state as u64) << STATE_SHIFT) | (outstanding & COUNT_MASK))
    }

    fn state(self) -> SchedulerState {
        SchedulerState::from_u8((self.0 >> STATE_SHIFT) as u8)
    }

    fn outstanding(self) -> u64 {
        self.0 & COUNT_MASK
    }

    fn with_state(self, state: SchedulerState) -> Self {
        Self::new(state, self.outstanding())
    }
}

/// State shared by the scheduler handle, its workers, cowns and behaviors
pub(crate) struct Shared {
    control: AtomicU64,
    threads: AtomicUsize,
    leak_detection: AtomicBool,
    leaked: AtomicBool,
    /// Workers that will each need a stop message at quiescence.
    workers: AtomicUsize,
    queue_tx: Sender<Task>,
    pub(crate) queue_rx: Receiver<Task>,
    pub(crate) ledger: AllocationLedger,
    pub(crate) diagnostics: Arc<Diagnostics>,
    pub(crate) metrics: SchedulerMetrics,
    /// First behavior panic of the current run.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Shared {
    fn new(diagnostics: Arc<Diagnostics>) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        Self {
            control: AtomicU64::new(Control::new(SchedulerState::Uninitialized, 0).0),
            threads: AtomicUsize::new(0),
            leak_detection: AtomicBool::new(false),
            leaked: AtomicBool::new(false),
            workers: AtomicUsize::new(0),
            queue_tx,
            queue_rx,
            ledger: AllocationLedger::new(),
            diagnostics,
            metrics: SchedulerMetrics::default(),
            panic: Mutex::new(None),
        }
    }

    fn control(&self) -> Control {
        Control(self.control.load(Ordering::Acquire))
    }

    fn state(&self) -> SchedulerState {
        self.control().state()
    }

    fn outstanding(&self) -> usize {
        self.control().outstanding() as usize
    }

    /// Apply `f` to the control word atomically; `None` leaves it unchanged
    fn update(
        &self,
        mut f: impl FnMut(Control) -> Option<Control>,
    ) -> std::result::Result<Control, Control> {
        self.control
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                f(Control(raw)).map(|next| next.0)
            })
            .map(Control)
            .map_err(Control)
    }

    fn set_state(&self, state: SchedulerState) {
        let _ = self.update(|control| Some(control.with_state(state)));
    }

    /// Count a new behavior towards quiescence
    pub(crate) fn work_submitted(&self) -> Result<()> {
        self.update(|control| {
            control
                .state()
                .is_accepting()
                .then(|| Control(control.0 + 1))
        })
        .map_err(|control| RuntimeError::NotAccepting {
            state: control.state(),
        })?;
        self.metrics.record_scheduled();
        Ok(())
    }

    /// Hand a runnable behavior to the workers
    pub(crate) fn submit(&self, behavior: Arc<BehaviorCore>) {
        if let Err(err) = self.queue_tx.send(Task::Run(behavior)) {
            // The receiver lives in `self`, so this cannot disconnect.
            error!("Run-queue disconnected: {}", err);
        }
    }

    /// Count a completed behavior; the last one stops every worker
    pub(crate) fn work_completed(&self) {
        let quiescent = |control: Control| {
            control.outstanding() == 1 && control.state() == SchedulerState::Running
        };
        let previous = self.update(|control| {
            let next = Control(control.0 - 1);
            Some(if quiescent(control) {
                next.with_state(SchedulerState::Stopping)
            } else {
                next
            })
        });

        if previous.is_ok_and(quiescent) {
            let workers = self.workers.load(Ordering::Acquire);
            debug!(workers, "Quiescent, stopping workers");
            for _ in 0..workers {
                if let Err(err) = self.queue_tx.send(Task::Stop) {
                    error!("Run-queue disconnected: {}", err);
                }
            }
        }
    }

    pub(crate) fn record_panic(&self, payload: Box<dyn Any + Send>) {
        let mut slot = self.panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.panic.lock().take()
    }

    #[cfg(test)]
    pub(crate) fn try_dequeue(&self) -> Option<Arc<BehaviorCore>> {
        match self.queue_rx.try_recv() {
            Ok(Task::Run(behavior)) => Some(behavior),
            _ => None,
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("state", &self.state())
            .field("threads", &self.threads.load(Ordering::Relaxed))
.field("outstanding", &self.outstanding())
            .field("queued", &self.queue_rx.len())
            .field("ledger", &self.ledger.snapshot())
            .finish()
    }
}

/// Handle to a behavior scheduler
#[derive(Debug, Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Uninitialized scheduler reporting to the process-wide diagnostics
    pub fn new() -> Self {
        Self::with_diagnostics(Diagnostics::global())
    }

    /// Uninitialized scheduler reporting to `diagnostics`
    pub fn with_diagnostics(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            shared: Arc::new(Shared::new(diagnostics)),
        }
    }

    /// Initialized scheduler built from a loaded configuration
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let diagnostics = Arc::new(Diagnostics::from_settings(&config.diagnostics));
        let scheduler = Self::with_diagnostics(diagnostics);
        scheduler.set_leak_detection(config.scheduler.leak_detection);
        scheduler.initialize(config.scheduler.threads)?;
        Ok(scheduler)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Allocate worker contexts; valid once, or again after a completed run
    pub fn initialize(&self, threads: usize) -> Result<()> {
        if threads == 0 || threads > defaults::scheduler::MAX_THREADS {
            return Err(RuntimeError::InvalidThreadCount { threads });
        }

        let current = self
            .shared
            .update(|control| {
                matches!(
                    control.state(),
                    SchedulerState::Uninitialized | SchedulerState::Stopped
                )
                .then(|| control.with_state(SchedulerState::Initialized))
            })
            .map_err(|control| RuntimeError::AlreadyInitialized {
                state: control.state(),
            })?
            .state();

        self.shared.threads.store(threads, Ordering::Release);
        self.shared.leaked.store(false, Ordering::Release);
        info!(threads, rearmed = current == SchedulerState::Stopped, "Scheduler initialized");
        Ok(())
    }

    /// Run every submitted behavior to completion and stop at quiescence.
    ///
    /// If a behavior panicked, the first panic is re-raised here once the
    /// scheduler has stopped.
    pub fn run(&self) -> Result<()> {
        if let Some(payload) = self.run_inner()? {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    fn run_inner(&self) -> Result<Option<Box<dyn Any + Send>>> {
        let threads = self.threads();
        // Workers must be counted before any of them can reach quiescence.
        self.shared.workers.store(threads, Ordering::Release);

        // With nothing queued the run is over before it starts.
        let started = self
            .shared
            .update(|control| {
                (control.state() == SchedulerState::Initialized).then(|| {
                    if control.outstanding() == 0 {
                        control.with_state(SchedulerState::Stopping)
                    } else {
                        control.with_state(SchedulerState::Running)
                    }
                })
            })
            .map_err(|control| RuntimeError::NotInitialized {
                state: control.state(),
            })?;

        self.shared.metrics.record_run();
        info!(
            threads,
            outstanding = started.outstanding(),
            "Scheduler running"
        );

        if started.outstanding() > 0 {
            if let Err(err) = self.run_workers(threads) {
                self.shared.set_state(SchedulerState::Initialized);
                return Err(err);
            }
        }
        self.shared.workers.store(0, Ordering::Release);

        self.shared.set_state(SchedulerState::Stopped);
        self.check_leaks();
        info!(stats = ?self.stats(), "Scheduler quiescent");
        Ok(self.shared.take_panic())
    }

    fn run_workers(&self, threads: usize) -> Result<()> {
        let (go_tx, go_rx) = crossbeam_channel::unbounded();
        let mut handles = Vec::with_capacity(threads);

        for id in 0..threads {
            let worker = Worker::new(id, Arc::clone(&self.shared));
            let go = go_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("cown-worker-{}", id))
                .spawn(move || worker.start(go));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    error!(worker = id, error = %source, "Failed to spawn worker thread");
                    // Closing the start channel releases the workers already spawned.
                    drop(go_tx);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(RuntimeError::ThreadSpawn { worker: id, source });
                }
            }
        }

        for _ in 0..threads {
            let _ = go_tx.send(());
        }
        drop(go_tx);

        for handle in handles {
            if let Err(payload) = handle.join() {
                self.shared.record_panic(payload);
            }
        }
        Ok(())
    }

    fn check_leaks(&self) {
        if !self.leak_detection() {
            self.shared.leaked.store(false, Ordering::Release);
            return;
        }

        let snapshot = self.shared.ledger.snapshot();
        let leaked = snapshot.live() > 0;
        self.shared.leaked.store(leaked, Ordering::Release);

        if leaked {
            warn!(
                live_cowns = snapshot.live_cowns,
                live_behaviors = snapshot.live_behaviors,
                "Leak detected after quiescence"
            );
            self.shared.diagnostics.line(format_args!(
                "leak detected: {} cowns, {} behaviors",
                snapshot.live_cowns, snapshot.live_behaviors
            ));
        }
    }

    pub fn set_leak_detection(&self, enabled: bool) {
        self.shared.leak_detection.store(enabled, Ordering::Release);
    }

    pub fn leak_detection(&self) -> bool {
        self.shared.leak_detection.load(Ordering::Acquire)
    }

    /// Leak finding from the last completed run
    pub fn has_leaked(&self) -> bool {
        self.shared.leaked.load(Ordering::Acquire)
    }

    /// Cowns and behaviors of this scheduler that are still allocated
    pub fn live_allocations(&self) -> usize {
        self.shared.ledger.live()
    }

    /// Behaviors submitted and not yet completed
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding()
    }

    /// Runnable behaviors waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue_rx.len()
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    /// Configured worker count (0 before `initialize`)
    pub fn threads(&self) -> usize {
        self.shared.threads.load(Ordering::Acquire)
    }

    pub fn diagnostics(&self) -> Arc<Diagnostics> {
        Arc::clone(&self.shared.diagnostics)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.metrics.snapshot(self.shared.ledger.snapshot())
    }

    /// Whether both handles refer to the same scheduler
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` against a fresh scheduler with the default thread count, then
/// run the scheduler to quiescence.
///
/// The scheduler runs even if `f` panics.
pub fn with<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    with_threads(defaults::scheduler::DEFAULT_THREADS, f)
}

/// [`with`] using `threads` workers
pub fn with_threads<R>(threads: usize, f: impl FnOnce(&Scheduler) -> R) -> R {
    let scheduler = Scheduler::new();
    if let Err(err) = scheduler.initialize(threads) {
        panic!("cown scheduler: {}", err);
    }
    run_guarded(&scheduler, f)
}

/// [`with`] plus leak detection; panics with "leaks detected" when the
/// scheduler still owns live allocations after quiescence.
pub fn with_leak_detector<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    let scheduler = Scheduler::new();
    scheduler.set_leak_detection(true);
    if let Err(err) = scheduler.initialize(defaults::scheduler::DEFAULT_THREADS) {
        panic!("cown scheduler: {}", err);
    }

    let result = run_guarded(&scheduler, f);

    if scheduler.has_leaked() {
        panic!(
            "leaks detected: {} live allocations",
            scheduler.live_allocations()
        );
    }
    result
}

fn run_guarded<R>(scheduler: &Scheduler, f: impl FnOnce(&Scheduler) -> R) -> R {
    struct RunOnDrop<'a>(&'a Scheduler);

    impl Drop for RunOnDrop<'_> {
        fn drop(&mut self) {
            let unwinding = thread::panicking();
            match self.0.run_inner() {
                Ok(None) => {}
                Ok(Some(payload)) => {
                    if unwinding {
                        error!("Behavior panic discarded while already unwinding");
                    } else {
                        panic::resume_unwind(payload);
                    }
                }
                Err(err) => {
                    if unwinding {
                        error!("Scheduler failed to run while unwinding: {}", err);
                    } else {
                        panic!("cown scheduler: {}", err);
                    }
                }
            }
        }
    }

    let guard = RunOnDrop(scheduler);
    let result = f(scheduler);
    drop(guard);
    result
}
