//! Runtime Error Types
//!
//! Usage errors are rejected synchronously by the call that introduced them
//! and never leave partial state behind. Resource errors surface to the
//! caller of the failing operation.

use crate::cown::CownId;
use crate::scheduler::SchedulerState;
use thiserror::Error;

/// Main runtime error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A behavior must name at least one cown
    #[error("Behavior requested no cowns")]
    NoCowns,

    /// The same cown appeared twice in one request set
    #[error("Cown {cown} requested twice by the same behavior")]
    DuplicateCown { cown: CownId },

    /// The cown was created by a different scheduler
    #[error("Cown {cown} belongs to another scheduler")]
    ForeignCown { cown: CownId },

    /// `initialize` called while initialized or running
    #[error("Scheduler already initialized (state: {state:?})")]
    AlreadyInitialized { state: SchedulerState },

    /// `run` called before `initialize`
    #[error("Scheduler not initialized (state: {state:?})")]
    NotInitialized { state: SchedulerState },

    /// Thread count outside the accepted range
    #[error("Invalid thread count: {threads}")]
    InvalidThreadCount { threads: usize },

    /// Work submitted while the scheduler cannot accept it
    #[error("Scheduler not accepting behaviors (state: {state:?})")]
    NotAccepting { state: SchedulerState },

    /// Worker thread could not be started
    #[error("Failed to spawn worker thread {worker}: {source}")]
    ThreadSpawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    /// Check if this is a programmer error rather than a resource failure
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, RuntimeError::ThreadSpawn { .. })
    }

    /// The offending cown, if the error is about one
    pub fn cown(&self) -> Option<CownId> {
        match self {
            RuntimeError::DuplicateCown { cown } | RuntimeError::ForeignCown { cown } => {
                Some(*cown)
            }
            _ => None,
        }
    }
}
