//! # Global Event Bus
//!
//! One world-wide topic carries round state, combat, and economy messages. This
//! module decodes deliveries into [`GlobalEvent`]s and applies the receive-side
//! rules before anything reaches the driver:
//!
//! - `dash` and `hit` published by the local entity are dropped
//! - a `coin_spawn` for an id already known is dropped
//! - a `coin_collected` for an id never seen is dropped
//!
//! Everything else is passed through in delivery order.

use crate::cell::Topic;
use crate::error::TransportError;
use crate::events::{CombatEvent, EconomyEvent, EventError, GlobalEvent, LocalEvent, Message};
use crate::transport::Transport;
use crate::types::{Coin, CoinId, EntityId};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Receive-side state of the global topic for one session.
#[derive(Debug)]
pub struct GlobalEventBus {
    local_id: EntityId,
    topic: Topic,
    coins: HashMap<CoinId, Coin>,
}

impl GlobalEventBus {
    pub fn new(local_id: EntityId) -> Self {
        Self {
            local_id,
            topic: Topic::global(),
            coins: HashMap::new(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub async fn join(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        transport.subscribe(&self.topic).await
    }

    /// Decodes a delivery and decides whether the driver should see it.
    ///
    /// `Ok(None)` means the message was valid but filtered out.
    pub fn accept(&mut self, message: &Message) -> Result<Option<GlobalEvent>, EventError> {
        let event = GlobalEvent::from_message(message)?;

        let deliver = match &event {
            GlobalEvent::Combat(_) if message.is_from(&self.local_id) => {
                trace!("Ignoring own {} echo", message.name);
                false
            }
            GlobalEvent::Economy(EconomyEvent::CoinSpawned(coin)) => {
                if self.coins.contains_key(&coin.id) {
                    debug!("Duplicate spawn of coin {}", coin.id);
                    false
                } else {
                    self.coins.insert(coin.id.clone(), coin.clone());
                    true
                }
            }
            GlobalEvent::Economy(EconomyEvent::CoinCollected(id)) => {
                if self.coins.remove(id).is_some() {
                    true
                } else {
                    debug!("Collect for unknown coin {}", id);
                    false
                }
            }
            GlobalEvent::Combat(CombatEvent::Dash { .. } | CombatEvent::Hit { .. }) => true,
            GlobalEvent::Tournament(_) => true,
        };

        Ok(deliver.then_some(event))
    }

    /// Builds the envelope for a local event.
    pub fn outgoing(&self, event: LocalEvent) -> Result<Message, EventError> {
        event.into_message(self.local_id.clone())
    }

    /// Coins currently known to be on the field.
    pub fn coins(&self) -> impl Iterator<Item = &Coin> {
        self.coins.values()
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }

    pub fn clear(&mut self) {
        self.coins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{COIN_COLLECTED, DASH, HIT};
    use crate::types::TournamentState;
    use serde_json::json;

    fn bus() -> GlobalEventBus {
        GlobalEventBus::new(EntityId::from("me"))
    }

    fn spawn(origin: &str, id: &str) -> Message {
        LocalEvent::CoinSpawn(Coin::new(id, 10.0, 20.0))
            .into_message(EntityId::from(origin))
            .unwrap()
    }

    #[test]
    fn test_own_dash_and_hit_are_filtered() {
        let mut bus = bus();
        let own_dash = Message::new(DASH, EntityId::from("me"), json!({}));
        let own_hit = Message::new(HIT, EntityId::from("me"), json!({"targetId": "p2", "damage": 20}));
        assert_eq!(bus.accept(&own_dash).unwrap(), None);
        assert_eq!(bus.accept(&own_hit).unwrap(), None);

        let remote_dash = Message::new(DASH, EntityId::from("p2"), json!({}));
        assert!(bus.accept(&remote_dash).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_spawn_is_noop() {
        let mut bus = bus();
        assert!(bus.accept(&spawn("p2", "coin_1")).unwrap().is_some());
        assert_eq!(bus.accept(&spawn("p3", "coin_1")).unwrap(), None);
        assert_eq!(bus.coin_count(), 1);
    }

    #[test]
    fn test_collect_of_unknown_coin_is_noop() {
        let mut bus = bus();
        let collect = Message::new(COIN_COLLECTED, EntityId::from("p2"), json!("coin_404"));
        assert_eq!(bus.accept(&collect).unwrap(), None);

        bus.accept(&spawn("p2", "coin_1")).unwrap();
        let collect = Message::new(COIN_COLLECTED, EntityId::from("p2"), json!("coin_1"));
        assert_eq!(
            bus.accept(&collect).unwrap(),
            Some(GlobalEvent::Economy(EconomyEvent::CoinCollected(CoinId::from("coin_1"))))
        );
        // Second collect of the same coin
        assert_eq!(bus.accept(&collect).unwrap(), None);
    }

    #[test]
    fn test_own_state_echo_is_delivered() {
        let mut bus = bus();
        let state = bus
            .outgoing(LocalEvent::TournamentState(TournamentState::new(0.2, 120, true)))
            .unwrap();
        assert!(matches!(
            bus.accept(&state).unwrap(),
            Some(GlobalEvent::Tournament(_))
        ));
    }
}
