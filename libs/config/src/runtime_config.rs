//! Runtime Configuration Module
//!
//! Provides configuration loading and management for the cown runtime.
//! Supports loading from TOML files with environment variable overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Prefix for environment overrides (`COWN_SCHEDULER__THREADS=8`)
pub const ENV_PREFIX: &str = "COWN";

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool and shutdown checks
    pub scheduler: SchedulerSettings,

    /// Logging sink and flight recorder
    pub diagnostics: DiagnosticsSettings,
}

/// Scheduler settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub threads: usize,
    pub leak_detection: bool,
}

/// Diagnostics settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub logging: bool,
    pub flight_recorder_capacity: usize,
    pub log_level: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            threads: defaults::scheduler::DEFAULT_THREADS,
            leak_detection: defaults::scheduler::DEFAULT_LEAK_DETECTION,
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            logging: defaults::diagnostics::DEFAULT_LOGGING,
            flight_recorder_capacity: defaults::diagnostics::DEFAULT_FLIGHT_RECORDER_CAPACITY,
            log_level: defaults::diagnostics::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration: defaults, then the optional file, then `COWN_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = Config::try_from(&RuntimeConfig::default())
            .context("Failed to seed configuration defaults")?;

        let mut builder = Config::builder().add_source(base);

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(
            threads = config.scheduler.threads,
            leak_detection = config.scheduler.leak_detection,
            logging = config.diagnostics.logging,
            "Runtime configuration loaded"
        );
        Ok(config)
    }

    /// Parse a TOML document directly, without environment overrides
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(source).context("Failed to parse runtime config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize runtime config")
    }

    /// Reject values the scheduler cannot honour
    pub fn validate(&self) -> Result<()> {
        let threads = self.scheduler.threads;
        if threads == 0 || threads > defaults::scheduler::MAX_THREADS {
            bail!(
                "scheduler.threads must be in 1..={}, got {}",
                defaults::scheduler::MAX_THREADS,
                threads
            );
        }
        if self.diagnostics.flight_recorder_capacity == 0 {
            bail!("diagnostics.flight_recorder_capacity must be non-zero");
        }
        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(path)
}
