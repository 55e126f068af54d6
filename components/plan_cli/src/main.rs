//! Execution plan runner
//!
//! Entry point for `plan-runner`. Parses CLI arguments, installs logging and
//! runs the selected scenario on a fresh runtime.

use clap::Parser as ClapParser;
use plan_cli::{Cli, CliError, Runner};
use std::io::Write;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(&cli) {
        match e {
            CliError::Config(e) => eprintln!("Configuration Error: {}", e),
            CliError::Runtime(e) => eprintln!("Runtime Error: {}", e),
            CliError::Io(e) => eprintln!("Error: {}", e),
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let runner = Runner::from_cli(cli)?;
    let report = runner.run(cli.scenario)?;
    writeln!(std::io::stdout(), "{}", report)?;
    Ok(())
}
