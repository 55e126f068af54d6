//! Command line arguments for `plan-runner`.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Runs one execution-plan scenario on a fresh runtime and prints a report.
#[derive(Debug, Parser)]
#[command(name = "plan-runner", version, about)]
pub struct Cli {
    /// JSON file with runtime configuration
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of worker threads, overriding the configuration file
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Log filter, e.g. `info` or `async_runtime=debug`
    #[arg(long, value_name = "FILTER", default_value = "warn")]
    pub log_level: String,

    /// Scenario to run
    #[arg(value_enum)]
    pub scenario: Scenario,
}

/// The scenarios `plan-runner` knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Three timer-completed steps run one after another
    Sequential,
    /// Three plans of different lengths fanned out under one parent
    Parallel,
    /// A step that is never completed and times out
    Timeout,
    /// Callbacks queued on the deferred task scheduler
    Deferred,
    /// Ten thousand synchronously completed steps
    Trampoline,
}

impl Scenario {
    /// The name the scenario is selected by on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Sequential => "sequential",
            Scenario::Parallel => "parallel",
            Scenario::Timeout => "timeout",
            Scenario::Deferred => "deferred",
            Scenario::Trampoline => "trampoline",
        }
    }
}
