//! End-to-End Test Runner for the Cown Runtime

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use cown_e2e_tests::{
    framework::{save_results_to_file, TestFramework},
    scenarios::{
        all_scenarios, DestructorOnDrop, LeakedHandle, PairWithTraffic, ReverseOrder,
        SingleCownWrite, StressTest,
    },
    TestResult, TestScenario,
};
use runtime_config::RuntimeConfig;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Runtime configuration file (TOML); COWN_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output results to file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one of the fixed scenarios
    Scenario {
        #[arg(value_enum, default_value_t = ScenarioName::All)]
        name: ScenarioName,
    },

    /// Flood random overlapping cown sets
    Stress {
        #[arg(long, default_value_t = 64)]
        cowns: usize,

        #[arg(long, default_value_t = 20_000)]
        behaviors: usize,

        /// Worker threads (defaults to the configured count)
        #[arg(long)]
        threads: Option<usize>,

        /// Largest number of cowns one behavior requests
        #[arg(long, default_value_t = 4)]
        max_width: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScenarioName {
    A,
    B,
    C,
    D,
    E,
    All,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = RuntimeConfig::load(args.config.as_deref())?;

    let log_level = if args.verbose {
        Level::DEBUG.to_string()
    } else {
        config.diagnostics.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("cown_e2e_tests={}", log_level).parse()?)
                .add_directive(format!("e2e_runner={}", log_level).parse()?)
                .add_directive(format!("cown_runtime={}", log_level).parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cown Runtime E2E Suite");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let scenarios: Vec<Box<dyn TestScenario>> = match args.command {
        Command::Scenario { name } => match name {
            ScenarioName::A => vec![Box::new(SingleCownWrite)],
            ScenarioName::B => vec![Box::new(PairWithTraffic::default())],
            ScenarioName::C => vec![Box::new(ReverseOrder::default())],
            ScenarioName::D => vec![Box::new(DestructorOnDrop)],
            ScenarioName::E => vec![Box::new(LeakedHandle)],
            ScenarioName::All => {
                info!("Running all test scenarios");
                all_scenarios()
            }
        },
        Command::Stress {
            cowns,
            behaviors,
            threads,
            max_width,
        } => {
            if let Some(threads) = threads {
                config.scheduler.threads = threads;
            }
            info!(cowns, behaviors, threads = config.scheduler.threads, "Running stress test");
            vec![Box::new(StressTest {
                cowns,
                behaviors,
                max_width,
            })]
        }
    };

    let framework = TestFramework::new(config)?;
    let results = framework.run_all(&scenarios);

    print_results_summary(&results);

    if let Some(output_path) = args.output {
        save_results_to_file(&results, &output_path)?;
        info!("Results saved to: {}", output_path.display());
    }

    if !results.iter().all(|r| r.success) {
        error!("Some tests failed");
        std::process::exit(1);
    }

    info!("All tests passed successfully!");
    Ok(())
}

fn print_results_summary(results: &[TestResult]) {
    println!("\n═══════════════════════════════════════");
    println!("        TEST RESULTS SUMMARY");
    println!("═══════════════════════════════════════");

    let total_tests = results.len();
    let passed_tests = results.iter().filter(|r| r.success).count();

    println!("Total Tests: {}", total_tests);
    println!("Passed:      {} ✓", passed_tests);
    println!("Failed:      {} ✗", total_tests - passed_tests);
    println!();

    for result in results {
        let status = if result.success { "✓ PASS" } else { "✗ FAIL" };
        println!(
            "{} {} ({} ms)",
            status,
            result.scenario_name,
            result.duration.as_millis()
        );

        if let Some(ref error) = result.error_message {
            println!("      Error: {}", error);
        }

        println!(
            "      Behaviors: {} | Throughput: {:.1} beh/s | Avg run: {:.0} ns",
            result.metrics.behaviors_completed,
            result.metrics.throughput_behaviors_per_sec,
            result.metrics.avg_run_time_ns
        );

        for validation in result.validation_results.iter().filter(|v| !v.passed) {
            println!("        - {}: {}", validation.validator, validation.message);
        }
    }

    println!("═══════════════════════════════════════");
}
