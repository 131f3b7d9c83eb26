//! End-to-End Test Framework for the Cown Runtime
//!
//! Runs self-contained scheduling scenarios against a scheduler built from
//! [`runtime_config::RuntimeConfig`] and reports per-scenario validation
//! results and scheduler metrics.

pub mod scenarios;

pub use framework::{save_results_to_file, TestFramework, TestResult, TestScenario};
pub use scenarios::*;
