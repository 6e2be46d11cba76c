//! Configuration management for the simulation host.
//!
//! This module handles loading, CLI overrides, and validation of the host
//! configuration from a TOML file.

use crate::cli::CliArgs;
use gridsync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_bots() -> usize {
    8
}

fn default_duration_secs() -> u64 {
    60
}

fn default_world_width() -> f64 {
    2400.0
}

fn default_world_height() -> f64 {
    1800.0
}

fn default_speed() -> f64 {
    200.0
}

fn default_entity_size() -> f64 {
    24.0
}

fn default_frame_ms() -> u64 {
    16 // ~60 frames per second
}

fn default_round_secs() -> u32 {
    120
}

fn default_intermission_secs() -> u64 {
    5
}

fn default_prize_per_player() -> f64 {
    0.1
}

fn default_max_coins() -> usize {
    20
}

fn default_coin_spawn_chance() -> f64 {
    0.05
}

fn default_collect_radius() -> f64 {
    25.0
}

fn default_hit_radius() -> f64 {
    30.0
}

fn default_hit_damage() -> u32 {
    20
}

fn default_dash_multiplier() -> f64 {
    3.0
}

fn default_dash_duration_ms() -> u64 {
    200
}

fn default_dash_chance() -> f64 {
    0.2
}

fn default_stats_interval_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Settings handed to every session
    #[serde(default)]
    pub sync: SyncConfig,
    /// World and game rules for the simulated players
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// World size and game rules.
///
/// The defaults mirror the browser game the sync layer was built for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Number of simulated players
    #[serde(default = "default_bots")]
    pub bots: usize,
    /// Run length in seconds, 0 runs until a shutdown signal
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,
    #[serde(default = "default_world_width")]
    pub world_width: f64,
    #[serde(default = "default_world_height")]
    pub world_height: f64,
    /// Units per second
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Entity radius, also the margin kept from the world edge
    #[serde(default = "default_entity_size")]
    pub entity_size: f64,
    /// Game loop frame period
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    #[serde(default = "default_round_secs")]
    pub round_secs: u32,
    /// Pause between the end of a round and the next one
    #[serde(default = "default_intermission_secs")]
    pub intermission_secs: u64,
    /// Prize pool contribution of every participant
    #[serde(default = "default_prize_per_player")]
    pub prize_per_player: f64,
    #[serde(default = "default_max_coins")]
    pub max_coins: usize,
    /// Probability per second that the clock authority spawns a coin
    #[serde(default = "default_coin_spawn_chance")]
    pub coin_spawn_chance: f64,
    #[serde(default = "default_collect_radius")]
    pub collect_radius: f64,
    #[serde(default = "default_hit_radius")]
    pub hit_radius: f64,
    #[serde(default = "default_hit_damage")]
    pub hit_damage: u32,
    #[serde(default = "default_dash_multiplier")]
    pub dash_multiplier: f64,
    #[serde(default = "default_dash_duration_ms")]
    pub dash_duration_ms: u64,
    /// Probability per second that an idle player dashes
    #[serde(default = "default_dash_chance")]
    pub dash_chance: f64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            bots: default_bots(),
            duration_secs: default_duration_secs(),
            world_width: default_world_width(),
            world_height: default_world_height(),
            speed: default_speed(),
            entity_size: default_entity_size(),
            frame_ms: default_frame_ms(),
            round_secs: default_round_secs(),
            intermission_secs: default_intermission_secs(),
            prize_per_player: default_prize_per_player(),
            max_coins: default_max_coins(),
            coin_spawn_chance: default_coin_spawn_chance(),
            collect_radius: default_collect_radius(),
            hit_radius: default_hit_radius(),
            hit_damage: default_hit_damage(),
            dash_multiplier: default_dash_multiplier(),
            dash_duration_ms: default_dash_duration_ms(),
            dash_chance: default_dash_chance(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(bots) = args.bots {
            self.simulation.bots = bots;
        }
        if let Some(duration) = args.duration_secs {
            self.simulation.duration_secs = duration;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        self.sync.validate().map_err(|e| e.to_string())?;

        let sim = &self.simulation;
        if sim.bots == 0 {
            return Err("simulation.bots must be greater than 0".to_string());
        }
        if sim.world_width <= sim.entity_size * 2.0 || sim.world_height <= sim.entity_size * 2.0 {
            return Err(format!(
                "World {}x{} is too small for entities of size {}",
                sim.world_width, sim.world_height, sim.entity_size
            ));
        }
        if sim.frame_ms == 0 || sim.stats_interval_secs == 0 {
            return Err("simulation.frame_ms and simulation.stats_interval_secs must be greater than 0".to_string());
        }
        if sim.hit_damage == 0 {
            return Err("simulation.hit_damage must be greater than 0".to_string());
        }
        for (name, chance) in [
            ("coin_spawn_chance", sim.coin_spawn_chance),
            ("dash_chance", sim.dash_chance),
        ] {
            if !(0.0..=1.0).contains(&chance) {
                return Err(format!("simulation.{name} must be within 0..=1, got {chance}"));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
