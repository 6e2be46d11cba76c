//! # gridsync simulator
//!
//! Runs a swarm of simulated players against the gridsync layer. Every player
//! owns a session on one shared in-memory broker, wanders the world, dashes
//! into others, collects coins, and plays timed rounds, so the whole sync path
//! (cell subscriptions, presence, the global bus, the round clock) is
//! exercised without a network.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! gridsync-sim
//!
//! # Forty players for five minutes
//! gridsync-sim --bots 40 --duration 300
//!
//! # Until Ctrl+C, JSON logs
//! gridsync-sim --duration 0 --json-logs
//! ```
//!
//! ## Configuration
//!
//! Settings are read from a TOML file (default: `gridsync.toml`) with `[sync]`,
//! `[simulation]` and `[logging]` tables. If the file doesn't exist, a default
//! configuration is written there.
//!
//! ## Signal Handling
//!
//! SIGINT (Ctrl+C) and SIGTERM stop the run early. Every session is
//! disconnected before the final statistics are logged; a second signal exits
//! immediately.

use tracing::error;

pub mod app;
pub mod bot;
pub mod cli;
pub mod config;
pub mod logging;
pub mod shutdown;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Entry point for the simulator binary.
///
/// # Exit Codes
///
/// * **0**: The run finished and every session disconnected
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file, so load it before the application does
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    config.apply_cli(&args);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Simulation error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start simulation: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, SimulationSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_application_creation_from_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("sim.toml");
        let args = CliArgs {
            config_path: config_path.clone(),
            bots: Some(2),
            duration_secs: Some(1),
            log_level: Some("debug".to_string()),
            json_logs: false,
        };

        let app = Application::new(args).await.unwrap();

        assert!(config_path.exists());
        assert_eq!(app.config().simulation.bots, 2);
        assert_eq!(app.config().simulation.duration_secs, 1);
        assert_eq!(app.config().logging.level, "debug");
    }

    #[tokio::test]
    async fn test_application_rejects_invalid_override() {
        let dir = TempDir::new().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("sim.toml"),
            bots: Some(0),
            duration_secs: None,
            log_level: None,
            json_logs: false,
        };

        assert!(Application::new(args).await.is_err());
    }

    #[test]
    fn test_cli_args_structure() {
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            bots: None,
            duration_secs: Some(0),
            log_level: Some("warn".to_string()),
            json_logs: true,
        };

        let mut config = AppConfig::default();
        config.apply_cli(&args);
        assert_eq!(config.simulation.duration_secs, 0);
        assert_eq!(config.simulation.bots, 8);
        assert!(config.logging.json_format);
    }
}
