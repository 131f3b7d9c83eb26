//! # Cown Runtime Configuration
//!
//! This crate provides configuration management and default values
//! for the cown runtime, so the scheduler, diagnostics and tooling agree
//! on the same knobs.
//!
//! ## Features
//!
//! - **Defaults**: Worker thread count, flight recorder capacity, log level
//! - **Runtime Configuration**: TOML files layered over defaults
//! - **Environment Overrides**: `COWN_` prefixed variables win over files
//!
//! ## Usage
//!
//! ```rust
//! use runtime_config::{defaults, RuntimeConfig};
//!
//! let config = RuntimeConfig::default();
//! assert_eq!(config.scheduler.threads, defaults::scheduler::DEFAULT_THREADS);
//! ```

pub mod defaults;
pub mod runtime_config;

// Re-export commonly used types
pub use runtime_config::{
    load_config, DiagnosticsSettings, RuntimeConfig, SchedulerSettings, ENV_PREFIX,
};
