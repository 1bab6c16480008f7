//! modsys - Main entry point
//!
//! Parses the command line, installs logging and hands the requested
//! command to the runner.

use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use modsys::cli::{Cli, Commands};
use modsys::runner::{self, Stage};

/// Initialize the tracing subscriber; `RUST_LOG` overrides the default level.
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let result = match cli.command {
        Commands::Discover { settings } => runner::run(&settings, Stage::Discover, &mut out),
        Commands::Load { settings } => runner::run(&settings, Stage::Load, &mut out),
        Commands::Check { settings } => runner::run(&settings, Stage::Check, &mut out),
        Commands::Key { key } => runner::print_key(&key, &mut out),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("✗ {}", e);
            ExitCode::FAILURE
        }
    }
}
