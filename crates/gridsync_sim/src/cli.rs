//! Command-line interface handling for the simulation host.
//!
//! Every option here overrides the matching setting from the configuration file.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "gridsync.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the number of simulated players
    pub bots: Option<usize>,
    /// Optional override for the run length in seconds (0 runs until a signal)
    pub duration_secs: Option<u64>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments. Exits with usage on invalid input.
    pub fn parse() -> Self {
        Self::from_matches(&Self::command().get_matches())
    }

    /// The clap command definition.
    pub fn command() -> Command {
        Command::new("gridsync-sim")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Simulated players exercising area-of-interest sync over an in-memory broker")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value(DEFAULT_CONFIG),
            )
            .arg(
                Arg::new("bots")
                    .short('b')
                    .long("bots")
                    .value_name("COUNT")
                    .help("Number of simulated players")
                    .value_parser(clap::value_parser!(usize)),
            )
            .arg(
                Arg::new("duration")
                    .short('d')
                    .long("duration")
                    .value_name("SECONDS")
                    .help("Run length in seconds, 0 runs until Ctrl+C")
                    .value_parser(clap::value_parser!(u64)),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            bots: matches.get_one::<usize>("bots").copied(),
            duration_secs: matches.get_one::<u64>("duration").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}
