//! Runtime defaults
//!
//! This module contains default configuration values and constants
//! used across the runtime crates for consistency.

/// Scheduler defaults
pub mod scheduler {
    /// Worker threads used when nothing else is configured
    pub const DEFAULT_THREADS: usize = 4;

    /// Upper bound accepted by config validation
    pub const MAX_THREADS: usize = 1024;

    /// Leak detection is opt-in
    pub const DEFAULT_LEAK_DETECTION: bool = false;
}

/// Diagnostics defaults
pub mod diagnostics {
    /// Number of lines retained by the flight recorder
    pub const DEFAULT_FLIGHT_RECORDER_CAPACITY: usize = 1024;

    /// Runtime logging starts disabled
    pub const DEFAULT_LOGGING: bool = false;

    /// Level handed to `tracing_subscriber` by binaries
    pub const DEFAULT_LOG_LEVEL: &str = "info";

    /// Tracing target used by the log sink
    pub const LOG_TARGET: &str = "cown_runtime::log";
}
