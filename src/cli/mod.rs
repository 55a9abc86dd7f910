//! Command-line interface for Roster.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Roster - user account service
#[derive(Debug, Parser)]
#[command(name = "roster")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Read configuration from this file instead of the default search paths
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Run the HTTP API (default)
    Serve,

    /// Create a default config file
    Init,

    /// Validate the configuration and print it with secrets masked
    #[command(name = "check-config")]
    CheckConfig,
}

impl Cli {
    #[must_use]
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["roster"]).unwrap();
        assert!(matches!(cli.command(), Commands::Serve));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_check_config_with_path() {
        let cli = Cli::try_parse_from(["roster", "check-config", "--config", "/tmp/r.toml"])
            .unwrap();
        assert!(matches!(cli.command(), Commands::CheckConfig));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/r.toml")));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["roster", "frobnicate"]).is_err());
    }
}
