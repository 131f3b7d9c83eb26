//! Concurrent Ownership Runtime
//!
//! Cowns (concurrent owners) wrap mutable state that is only reachable from
//! inside a scheduled behavior. A behavior names one or more cowns and runs
//! once it holds all of them exclusively; acquisition is lock-free and
//! deadlock-free regardless of the order the caller names the cowns in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  when*(cowns, f)  ┌──────────────────────┐
//! │    Caller    │──────────────────▶│ Acquisition protocol │
//! └──────────────┘                   │  per-cown FIFO queue │
//!        │ Cown::new                 │  n + 1 pending count │
//!        ▼                           └──────────┬───────────┘
//! ┌──────────────┐                              │ last resolve
//! │ Cown<T>      │◀──── AcquiredCown ────┐      ▼
//! │ id, payload, │                       │ ┌──────────────┐
//! │ queue tail   │                       └─│  Run-queue   │──▶ cown-worker-N
//! └──────────────┘                         └──────────────┘
//! ```
//!
//! - **Mutual exclusion**: at most one running behavior holds a cown
//! - **FIFO per cown**: behaviors on one cown run in submission order
//! - **Quiescence**: `Scheduler::run` returns when no work is outstanding
//!
//! # Examples
//!
//! ```rust
//! use cown_runtime::{scheduler, when, when2, Cown};
//!
//! scheduler::with(|s| {
//!     let account = Cown::new(s, 100i64);
//!     let audit = Cown::new(s, Vec::<String>::new());
//!
//!     when2(&account, &audit, |mut balance, mut log| {
//!         *balance -= 30;
//!         log.push(format!("withdrew 30, balance {}", *balance));
//!     })
//!     .unwrap();
//!
//!     when(&account, |balance| assert_eq!(*balance, 70)).unwrap();
//! });
//! ```

mod behavior;
pub mod cown;
pub mod diagnostics;
pub mod error;
pub mod scheduler;
pub mod when;

pub use behavior::BehaviorState;
pub use cown::{Cown, CownId};
pub use diagnostics::{Diagnostics, LogSink, LogValue};
pub use error::{Result, RuntimeError};
pub use scheduler::{
    with, with_leak_detector, with_threads, Scheduler, SchedulerState, SchedulerStats,
};
pub use when::{when, when2, when3, when_all, AcquiredCown};
