use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// modsys - Installer module discovery, loading and requirements checking
#[derive(Parser)]
#[command(name = "modsys")]
#[command(about = "Discover, load and check installer modules")]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the modules found in the search paths
    Discover {
        /// Path to the settings file
        settings: PathBuf,
    },
    /// Load the configured module sequence
    Load {
        /// Path to the settings file
        settings: PathBuf,
    },
    /// Load the configured sequence, then check module requirements
    Check {
        /// Path to the settings file
        settings: PathBuf,
    },
    /// Parse an instance key (`module` or `module@id`)
    Key {
        /// Instance key to parse
        key: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_with_verbose() {
        let cli = Cli::try_parse_from(["modsys", "--verbose", "check", "settings.json"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Check { .. }));
    }

    #[test]
    fn test_parse_key() {
        let cli = Cli::try_parse_from(["modsys", "key", "users@one"]).unwrap();
        match cli.command {
            Commands::Key { key } => assert_eq!(key, "users@one"),
            _ => panic!("expected key command"),
        }
    }
}
