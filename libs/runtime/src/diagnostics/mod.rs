//! Diagnostics
//!
//! Process-wide logging sink, flight recorder and allocation ledger. None
//! of this participates in scheduling decisions: with logging disabled the
//! runtime never touches the sink or the recorder.
//!
//! Lines are built per thread with [`Diagnostics::log`] /
//! [`Diagnostics::log_value`] and emitted by [`Diagnostics::endl`]:
//!
//! ```rust
//! use cown_runtime::diagnostics::{self, LogValue};
//!
//! diagnostics::enable_logging(true);
//! diagnostics::log("allocated ");
//! diagnostics::log_value(LogValue::Size(64));
//! diagnostics::endl();
//! let recent = diagnostics::dump_flight_recorder();
//! assert!(recent.iter().any(|r| r.line == "allocated 64"));
//! ```

pub mod flight_recorder;
pub mod ledger;
pub mod sink;

pub use flight_recorder::{FlightRecord, FlightRecorder};
pub use ledger::{AllocationLedger, LedgerSnapshot};
pub use sink::{LogSink, MemorySink, NullSink, TracingSink};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use runtime_config::DiagnosticsSettings;
use std::cell::RefCell;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A primitive value accepted by the log sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogValue {
    Str(String),
    Size(usize),
    Addr(usize),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Str(s) => f.write_str(s),
            LogValue::Size(n) => write!(f, "{}", n),
            LogValue::Addr(addr) => write!(f, "{:#x}", addr),
        }
    }
}

impl From<&str> for LogValue {
    fn from(s: &str) -> Self {
        LogValue::Str(s.to_string())
    }
}

impl From<String> for LogValue {
    fn from(s: String) -> Self {
        LogValue::Str(s)
    }
}

impl From<usize> for LogValue {
    fn from(n: usize) -> Self {
        LogValue::Size(n)
    }
}

impl<T> From<*const T> for LogValue {
    fn from(ptr: *const T) -> Self {
        LogValue::Addr(ptr as usize)
    }
}

thread_local! {
    /// Line under construction on this thread.
    static PENDING_LINE: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Logging sink plus flight recorder
#[derive(Debug)]
pub struct Diagnostics {
    enabled: AtomicBool,
    sink: RwLock<Arc<dyn LogSink>>,
    recorder: FlightRecorder,
}

static GLOBAL: Lazy<Arc<Diagnostics>> = Lazy::new(|| {
    Arc::new(Diagnostics::new(
        runtime_config::defaults::diagnostics::DEFAULT_FLIGHT_RECORDER_CAPACITY,
    ))
});

impl Diagnostics {
    /// Disabled diagnostics writing to `tracing`
    pub fn new(flight_recorder_capacity: usize) -> Self {
        Self::with_sink(flight_recorder_capacity, Arc::new(TracingSink))
    }

    pub fn with_sink(flight_recorder_capacity: usize, sink: Arc<dyn LogSink>) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sink: RwLock::new(sink),
            recorder: FlightRecorder::new(flight_recorder_capacity),
        }
    }

    pub fn from_settings(settings: &DiagnosticsSettings) -> Self {
        let diagnostics = Self::new(settings.flight_recorder_capacity);
        diagnostics.enable_logging(settings.logging);
        diagnostics
    }

    /// The process-wide instance used when nothing is injected
    pub fn global() -> Arc<Diagnostics> {
        Arc::clone(&GLOBAL)
    }

    pub fn enable_logging(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn logging_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.sink.write() = sink;
    }

    pub fn flight_recorder(&self) -> &FlightRecorder {
        &self.recorder
    }

    /// Append text to this thread's pending line
    pub fn log(&self, text: &str) {
        if !self.logging_enabled() {
            return;
        }
        PENDING_LINE.with(|line| line.borrow_mut().push_str(text));
    }

    /// Append a primitive value to this thread's pending line
    pub fn log_value(&self, value: impl Into<LogValue>) {
        if !self.logging_enabled() {
            return;
        }
        let value = value.into();
        PENDING_LINE.with(|line| {
            let _ = write!(line.borrow_mut(), "{}", value);
        });
    }

    /// Terminate this thread's pending line and emit it
    pub fn endl(&self) {
        if !self.logging_enabled() {
            return;
        }
        let line = PENDING_LINE.with(|line| std::mem::take(&mut *line.borrow_mut()));
        self.emit(line);
    }

    /// Emit one complete line
    pub fn line(&self, args: fmt::Arguments<'_>) {
        if !self.logging_enabled() {
            return;
        }
        self.emit(args.to_string());
    }

    fn emit(&self, line: String) {
        self.sink.read().write_line(&line);
        self.recorder.record(line);
    }

    /// Flush the flight recorder to the sink and return what was flushed
    pub fn dump_flight_recorder(&self) -> Vec<FlightRecord> {
        let records = self.recorder.drain();
        let sink = self.sink.read();
        sink.write_line(&format!(
            "flight recorder: {} records ({} evicted)",
            records.len(),
            self.recorder.evicted()
        ));
        for record in &records {
            sink.write_line(&format!("[{}] {}: {}", record.seq, record.thread, record.line));
        }
        records
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(runtime_config::defaults::diagnostics::DEFAULT_FLIGHT_RECORDER_CAPACITY)
    }
}

/// Enable or disable the process-wide logging sink
pub fn enable_logging(enabled: bool) {
    GLOBAL.enable_logging(enabled);
}

pub fn log(text: &str) {
    GLOBAL.log(text);
}

pub fn log_value(value: impl Into<LogValue>) {
    GLOBAL.log_value(value);
}

pub fn endl() {
    GLOBAL.endl();
}

pub fn dump_flight_recorder() -> Vec<FlightRecord> {
    GLOBAL.dump_flight_recorder()
}
