//! Error types for the plan runner CLI

use core_types::AsyncError;
use thiserror::Error;

/// Errors that can occur while running a scenario
#[derive(Debug, Error)]
pub enum CliError {
    /// The runtime configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[source] AsyncError),
    /// The runtime failed while running a scenario
    #[error("Runtime error: {0}")]
    Runtime(#[from] AsyncError),
    /// Writing the report failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
