//! # Core Type Definitions
//!
//! This module contains the value types that flow through the sync layer. None of
//! them are owned by this crate: snapshots, coins, and round state are produced by
//! the external game-state model and only carried in and out of the substrate.
//!
//! ## Key Types
//!
//! - [`EntityId`] - Opaque, session-stable identity of a participant
//! - [`EntitySnapshot`] - Immutable view of one entity at one instant
//! - [`TournamentState`] - Globally shared round state (last-write-wins)
//! - [`Coin`] / [`CoinId`] - Economy objects announced on the global bus
//!
//! ## Wire Format
//!
//! Field names on the wire follow the browser clients that share the substrate
//! (`isAlive`, `prizePool`, `roundStarted`, ...), so serde renames are applied
//! throughout.

use crate::events::EventError;
use serde::{Deserialize, Serialize};

/// Upper bound for entity hit points.
pub const MAX_HP: u8 = 100;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a participant.
///
/// The id doubles as the transport identity of the session that owns the entity,
/// which is how self-originated messages are recognised on delivery.
///
/// # Examples
///
/// ```rust
/// use gridsync::EntityId;
///
/// let id = EntityId::from("player_k2j4h1");
/// assert_eq!(id.as_str(), "player_k2j4h1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrows the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a spawned coin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoinId(pub String);

impl CoinId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CoinId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for CoinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Entity State
// ============================================================================

/// Snapshot of one entity as produced by the game-state model.
///
/// Snapshots are values: the sync layer copies them and never mutates them. The
/// only copy it keeps beyond a single tick is the last published snapshot, which
/// the broadcaster uses for movement-delta comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    /// Stable id for the whole session
    pub id: EntityId,
    /// Name shown above the entity
    #[serde(rename = "name")]
    pub display_name: String,
    /// World X coordinate
    pub x: f64,
    /// World Y coordinate
    pub y: f64,
    /// CSS-style colour string, opaque to this crate
    pub color: String,
    pub score: u32,
    /// Hit points in `0..=100`
    pub hp: u8,
    pub is_alive: bool,
    pub is_dashing: bool,
}

impl EntitySnapshot {
    /// Creates a live, full-health snapshot with zero score.
    ///
    /// # Arguments
    ///
    /// * `id` - Entity id (also the transport identity of its session)
    /// * `display_name` - Human readable name
    /// * `x`, `y` - World coordinates
    /// * `color` - Render colour, carried verbatim
    pub fn new(
        id: impl Into<EntityId>,
        display_name: impl Into<String>,
        x: f64,
        y: f64,
        color: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            x,
            y,
            color: color.into(),
            score: 0,
            hp: MAX_HP,
            is_alive: true,
            is_dashing: false,
        }
    }

    /// Returns a copy moved to a new position.
    pub fn moved_to(&self, x: f64, y: f64) -> Self {
        Self { x, y, ..self.clone() }
    }

    /// Checks the invariants a snapshot must hold before it is published or
    /// handed to the driver.
    pub fn validate(&self) -> Result<(), EventError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(EventError::InvalidPayload(format!(
                "snapshot {} has non-finite position ({}, {})",
                self.id, self.x, self.y
            )));
        }
        if self.hp > MAX_HP {
            return Err(EventError::InvalidPayload(format!(
                "snapshot {} has hp {} above {}",
                self.id, self.hp, MAX_HP
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Global State
// ============================================================================

/// Round state shared by every participant.
///
/// There is no per-field versioning: whichever state arrives last replaces the
/// previous one wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TournamentState {
    #[serde(rename = "prizePool")]
    pub prize_pool: f64,
    #[serde(rename = "timeLeft")]
    pub time_left_seconds: u32,
    #[serde(rename = "roundStarted")]
    pub round_active: bool,
}

impl TournamentState {
    pub fn new(prize_pool: f64, time_left_seconds: u32, round_active: bool) -> Self {
        Self {
            prize_pool,
            time_left_seconds,
            round_active,
        }
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if !self.prize_pool.is_finite() || self.prize_pool < 0.0 {
            return Err(EventError::InvalidPayload(format!(
                "prize pool must be a non-negative number, got {}",
                self.prize_pool
            )));
        }
        Ok(())
    }
}

/// A collectible announced on the global bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub id: CoinId,
    pub x: f64,
    pub y: f64,
}

impl Coin {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: CoinId::new(id),
            x,
            y,
        }
    }
}
