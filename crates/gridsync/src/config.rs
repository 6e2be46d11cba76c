//! Session configuration.
//!
//! A [`SyncConfig`] is handed to [`crate::Session::connect`] and consumed there.
//! Nothing in it can be changed once the session exists; in particular the cell
//! size is fixed because every participant must derive the same topic names.

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_cell_size() -> f64 {
    400.0
}

fn default_broadcast_interval_ms() -> u64 {
    50 // 20 position samples per second
}

fn default_movement_threshold() -> f64 {
    1.0
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_subscribe_retry_ms() -> u64 {
    1_000
}

fn default_round_tick_ms() -> u64 {
    1_000
}

fn default_state_resync_interval_secs() -> u64 {
    5
}

fn default_inbound_capacity() -> usize {
    1024
}

/// Tunables for one sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// World units per grid cell edge
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    /// Position broadcaster period in milliseconds
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Minimum movement on either axis before a new position is published
    #[serde(default = "default_movement_threshold")]
    pub movement_threshold: f64,
    /// How long `connect` waits for the transport to report connected
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Minimum delay before a failed cell subscription is retried in place
    #[serde(default = "default_subscribe_retry_ms")]
    pub subscribe_retry_ms: u64,
    /// Round clock resolution in milliseconds
    #[serde(default = "default_round_tick_ms")]
    pub round_tick_ms: u64,
    /// How often the clock authority republishes round state
    #[serde(default = "default_state_resync_interval_secs")]
    pub state_resync_interval_secs: u64,
    /// Capacity of the transport -> session delivery queue
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            movement_threshold: default_movement_threshold(),
            connect_timeout_ms: default_connect_timeout_ms(),
            subscribe_retry_ms: default_subscribe_retry_ms(),
            round_tick_ms: default_round_tick_ms(),
            state_resync_interval_secs: default_state_resync_interval_secs(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

impl SyncConfig {
    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "cell_size must be a positive number, got {}",
                self.cell_size
            )));
        }
        if !self.movement_threshold.is_finite() || self.movement_threshold < 0.0 {
            return Err(SyncError::InvalidConfig(format!(
                "movement_threshold must be a non-negative number, got {}",
                self.movement_threshold
            )));
        }
        if self.broadcast_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "broadcast_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.round_tick_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "round_tick_ms must be greater than 0".to_string(),
            ));
        }
        if self.state_resync_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "state_resync_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.inbound_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "inbound_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscribe_retry(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_ms)
    }

    pub fn round_tick(&self) -> Duration {
        Duration::from_millis(self.round_tick_ms)
    }

    pub fn state_resync_interval(&self) -> Duration {
        Duration::from_secs(self.state_resync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cell_size, 400.0);
        assert_eq!(config.broadcast_interval(), Duration::from_millis(50));
        assert_eq!(config.movement_threshold, 1.0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();
        config.cell_size = 0.0;
        assert!(config.validate().is_err());

        config.cell_size = f64::INFINITY;
        assert!(config.validate().is_err());

        config.cell_size = 400.0;
        config.broadcast_interval_ms = 0;
        assert!(config.validate().is_err());

        config.broadcast_interval_ms = 50;
        config.movement_threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"cell_size": 250.0}"#).unwrap();
        assert_eq!(config.cell_size, 250.0);
        assert_eq!(config.broadcast_interval_ms, 50);
        assert_eq!(config.inbound_capacity, 1024);
    }
}
