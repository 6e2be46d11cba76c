//! # Transport Abstraction
//!
//! The sync layer talks to its pub/sub substrate only through [`Transport`]. A
//! transport accepts calls from the session and pushes everything it receives
//! back through a single [`Inbound`] queue handed over in [`Transport::open`].
//! Funnelling all deliveries through one queue is what lets the session process
//! them one at a time without locks.
//!
//! [`MemoryBroker`] is the in-process implementation used by tests and the
//! simulation host.

mod memory;

pub use memory::{MemoryBroker, MemoryTransport, PublishRecord};

use crate::cell::Topic;
use crate::error::TransportError;
use crate::events::Message;
use crate::types::EntityId;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Connection state changes reported by the substrate.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connected,
    Failed(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAction {
    Enter,
    Leave,
}

/// One participant in a presence set.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMember {
    pub client_id: EntityId,
    /// Payload announced on enter
    pub data: Value,
}

/// Everything a transport delivers to its session.
#[derive(Debug, Clone)]
pub enum Inbound {
    Connection(ConnectionState),
    Message {
        topic: Topic,
        message: Message,
    },
    Presence {
        topic: Topic,
        action: PresenceAction,
        member: PresenceMember,
    },
}

/// Minimal pub/sub substrate.
///
/// Implementations must be cheap to call from the session loop. Publishing is
/// best-effort: `Ok` only means the message was handed to the substrate.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts connecting as `identity`. Completion (or failure) is reported as
    /// an [`Inbound::Connection`] on `inbound`, which also receives every later
    /// delivery.
    async fn open(
        &self,
        identity: &EntityId,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError>;

    async fn publish(&self, topic: &Topic, message: Message) -> Result<(), TransportError>;

    async fn presence_enter(&self, topic: &Topic, data: Value) -> Result<(), TransportError>;

    async fn presence_leave(&self, topic: &Topic) -> Result<(), TransportError>;

    /// Current members of a presence set, queried from the substrate.
    async fn presence_members(&self, topic: &Topic) -> Result<Vec<PresenceMember>, TransportError>;

    async fn close(&self);
}
