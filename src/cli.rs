//! Command-line interface for callguard
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Real-time voice-spoof screening for relayed phone calls
#[derive(Parser, Debug)]
#[command(
    name = "callguard",
    version,
    about = "Real-time voice-spoof screening for relayed phone calls"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime` (`500ms`, `5s`, `1m30s`);
/// bare numbers are seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSON-lines log of gateway and agent messages through one session
    Replay {
        /// Log file, or `-` for stdin
        #[arg(value_name = "FILE", default_value = "-")]
        input: String,

        /// How long the session may take to drain after the log ends
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        grace: Option<Duration>,

        /// Write every scored window as a WAV file into this directory
        #[arg(long, value_name = "DIR")]
        dump_dir: Option<PathBuf>,
    },

    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the configuration file
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration(" 1m30s ").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_replay_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["callguard", "replay"]).unwrap();
        match cli.command {
            Commands::Replay {
                input,
                grace,
                dump_dir,
            } => {
                assert_eq!(input, "-");
                assert_eq!(grace, None);
                assert_eq!(dump_dir, None);
            }
            _ => panic!("Expected Replay command"),
        }
    }

    #[test]
    fn test_replay_with_options() {
        let cli = Cli::try_parse_from([
            "callguard",
            "replay",
            "call.jsonl",
            "--grace",
            "2s",
            "--dump-dir",
            "/tmp/w",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Replay {
                input,
                grace,
                dump_dir,
            } => {
                assert_eq!(input, "call.jsonl");
                assert_eq!(grace, Some(Duration::from_secs(2)));
                assert_eq!(dump_dir, Some(PathBuf::from("/tmp/w")));
            }
            _ => panic!("Expected Replay command"),
        }
    }

    #[test]
    fn test_parse_config_actions() {
        for (arg, expected) in [("show", "Show"), ("path", "Path"), ("check", "Check")] {
            let cli = Cli::try_parse_from(["callguard", "config", arg]).unwrap();
            match cli.command {
                Commands::Config { action } => assert_eq!(format!("{action:?}"), expected),
                _ => panic!("Expected Config command"),
            }
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["callguard", "config", "show", "--config", "/etc/cg.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/cg.toml")));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["callguard"]).is_err());
    }
}
