//! Execution plan runner CLI library
//!
//! Provides the argument parser and the demonstration scenarios driven by
//! the `plan-runner` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runner;

pub use cli::{Cli, Scenario};
pub use error::{CliError, CliResult};
pub use runner::{Outcome, Report, Runner};
