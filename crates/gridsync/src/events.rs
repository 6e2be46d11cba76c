//! # Wire Messages and Global Events
//!
//! This module defines the envelope every message travels in, the payload codec,
//! and the typed events carried by the global bus.
//!
//! ## Message Names
//!
//! | name             | topic            | payload                    |
//! |------------------|------------------|----------------------------|
//! | `position`       | `cell:<x>:<y>`   | [`EntitySnapshot`]         |
//! | `state`          | `game:tournament`| [`TournamentState`]        |
//! | `coin_spawn`     | `game:tournament`| [`Coin`]                   |
//! | `coin_collected` | `game:tournament`| bare [`CoinId`] string     |
//! | `dash`           | `game:tournament`| `{}`                       |
//! | `hit`            | `game:tournament`| `{targetId, damage}`       |
//!
//! The originating participant is never part of the payload; it is stamped on the
//! envelope by the transport from the publisher's identity.

use crate::types::{Coin, CoinId, EntityId, EntitySnapshot, TournamentState};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

pub const POSITION: &str = "position";
pub const STATE: &str = "state";
pub const COIN_SPAWN: &str = "coin_spawn";
pub const COIN_COLLECTED: &str = "coin_collected";
pub const DASH: &str = "dash";
pub const HIT: &str = "hit";

// ============================================================================
// Errors
// ============================================================================

/// Failures while encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),
    #[error("Unknown message name: {0}")]
    UnknownMessage(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

// ============================================================================
// Payload Codec
// ============================================================================

/// Anything that can ride in a [`Message`] payload.
///
/// Implemented for every serde type through the blanket impl below, so payload
/// types only need to derive `Serialize` and `Deserialize`.
pub trait Payload: Sized {
    fn to_data(&self) -> Result<Value, EventError>;
    fn from_data(data: &Value) -> Result<Self, EventError>;
}

impl<T> Payload for T
where
    T: Serialize + DeserializeOwned + std::fmt::Debug,
{
    fn to_data(&self) -> Result<Value, EventError> {
        serde_json::to_value(self).map_err(|e| {
            tracing::error!(
                "Payload serialization failed for type '{}': {} (payload: {:?})",
                std::any::type_name::<T>(),
                e,
                self
            );
            EventError::Serialization(e)
        })
    }

    fn from_data(data: &Value) -> Result<Self, EventError> {
        // Malformed input is expected from a shared substrate; keep this at debug
        T::deserialize(data).map_err(|e| {
            tracing::debug!(
                "Payload did not match type '{}': {}",
                std::any::type_name::<T>(),
                e
            );
            EventError::Deserialization(e)
        })
    }
}

/// Envelope for everything published on the substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message name, see the table in the module docs
    pub name: String,
    /// Transport identity of the publisher
    pub origin: EntityId,
    pub data: Value,
}

impl Message {
    pub fn new(name: impl Into<String>, origin: EntityId, data: Value) -> Self {
        Self {
            name: name.into(),
            origin,
            data,
        }
    }

    /// Builds a message from a typed payload.
    pub fn encode<T: Payload>(
        name: impl Into<String>,
        origin: EntityId,
        payload: &T,
    ) -> Result<Self, EventError> {
        Ok(Self::new(name, origin, payload.to_data()?))
    }

    /// Builds a `position` message. The snapshot id is the origin.
    pub fn position(snapshot: &EntitySnapshot) -> Result<Self, EventError> {
        Self::encode(POSITION, snapshot.id.clone(), snapshot)
    }

    pub fn decode<T: Payload>(&self) -> Result<T, EventError> {
        T::from_data(&self.data)
    }

    /// Decodes and validates a `position` payload.
    pub fn decode_position(&self) -> Result<EntitySnapshot, EventError> {
        if self.name != POSITION {
            return Err(EventError::UnknownMessage(self.name.clone()));
        }
        let snapshot: EntitySnapshot = self.decode()?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn is_from(&self, id: &EntityId) -> bool {
        &self.origin == id
    }
}

// ============================================================================
// Global Bus Events
// ============================================================================

/// Combat actions. Fire-and-forget, never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    Dash { source: EntityId },
    Hit { target: EntityId, damage: u32 },
}

/// Economy events. Receivers treat them idempotently.
#[derive(Debug, Clone, PartialEq)]
pub enum EconomyEvent {
    CoinSpawned(Coin),
    CoinCollected(CoinId),
}

/// A decoded message from the global topic.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalEvent {
    Tournament(TournamentState),
    Combat(CombatEvent),
    Economy(EconomyEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HitPayload {
    target_id: EntityId,
    damage: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DashPayload {}

impl GlobalEvent {
    /// Decodes a global-topic message into its typed event.
    ///
    /// The dash source is the envelope origin; every other field comes from the
    /// payload. Shape or range violations come back as [`EventError`] and are
    /// counted as malformed by the caller.
    pub fn from_message(message: &Message) -> Result<Self, EventError> {
        match message.name.as_str() {
            STATE => {
                let state: TournamentState = message.decode()?;
                state.validate()?;
                Ok(Self::Tournament(state))
            }
            COIN_SPAWN => {
                let coin: Coin = message.decode()?;
                if !coin.x.is_finite() || !coin.y.is_finite() {
                    return Err(EventError::InvalidPayload(format!(
                        "coin {} has non-finite position",
                        coin.id
                    )));
                }
                Ok(Self::Economy(EconomyEvent::CoinSpawned(coin)))
            }
            COIN_COLLECTED => Ok(Self::Economy(EconomyEvent::CoinCollected(message.decode()?))),
            DASH => Ok(Self::Combat(CombatEvent::Dash {
                source: message.origin.clone(),
            })),
            HIT => {
                let hit: HitPayload = message.decode()?;
                if hit.damage == 0 {
                    return Err(EventError::InvalidPayload(format!(
                        "hit on {} carries zero damage",
                        hit.target_id
                    )));
                }
                Ok(Self::Combat(CombatEvent::Hit {
                    target: hit.target_id,
                    damage: hit.damage,
                }))
            }
            other => Err(EventError::UnknownMessage(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tournament(_) => STATE,
            Self::Combat(CombatEvent::Dash { .. }) => DASH,
            Self::Combat(CombatEvent::Hit { .. }) => HIT,
            Self::Economy(EconomyEvent::CoinSpawned(_)) => COIN_SPAWN,
            Self::Economy(EconomyEvent::CoinCollected(_)) => COIN_COLLECTED,
        }
    }
}

/// Events the driver publishes to the global bus.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    Dash,
    Hit { target: EntityId, damage: u32 },
    CoinSpawn(Coin),
    CoinCollect(CoinId),
    TournamentState(TournamentState),
}

impl LocalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dash => DASH,
            Self::Hit { .. } => HIT,
            Self::CoinSpawn(_) => COIN_SPAWN,
            Self::CoinCollect(_) => COIN_COLLECTED,
            Self::TournamentState(_) => STATE,
        }
    }

    /// Wraps the event in an envelope stamped with the local origin.
    pub fn into_message(self, origin: EntityId) -> Result<Message, EventError> {
        let name = self.name();
        match self {
            Self::Dash => Message::encode(name, origin, &DashPayload::default()),
            Self::Hit { target, damage } => {
                if damage == 0 {
                    return Err(EventError::InvalidPayload(
                        "hit damage must be positive".to_string(),
                    ));
                }
                Message::encode(name, origin, &HitPayload { target_id: target, damage })
            }
            Self::CoinSpawn(coin) => Message::encode(name, origin, &coin),
            Self::CoinCollect(coin_id) => Message::encode(name, origin, &coin_id),
            Self::TournamentState(state) => {
                state.validate()?;
                Message::encode(name, origin, &state)
            }
        }
    }
}
