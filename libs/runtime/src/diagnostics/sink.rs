//! Log sinks
//!
//! Completed diagnostic lines are handed to a [`LogSink`]. The default sink
//! forwards to `tracing`; tests swap in [`MemorySink`] or [`NullSink`].

use parking_lot::Mutex;
use runtime_config::defaults::diagnostics::LOG_TARGET;
use std::fmt;

/// Destination for completed diagnostic lines
pub trait LogSink: Send + Sync + fmt::Debug {
    fn write_line(&self, line: &str);
}

/// Forwards every line to `tracing` on the `cown_runtime::log` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write_line(&self, line: &str) {
        tracing::info!(target: LOG_TARGET, "{}", line);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write_line(&self, _line: &str) {}
}

/// Collects lines in memory for inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all received lines
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}
