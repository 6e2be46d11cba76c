//! In-process pub/sub substrate.
//!
//! [`MemoryBroker`] mimics the behaviour the sync layer relies on from a hosted
//! real-time service: named topics, presence sets with enter/leave
//! notifications, echo of a publisher's own messages, and best-effort delivery.
//! It also records every publish and lets tests inject failures.

use super::{ConnectionState, Inbound, PresenceAction, PresenceMember, Transport};
use crate::cell::Topic;
use crate::error::TransportError;
use crate::events::Message;
use crate::types::EntityId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

/// A message accepted by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub topic: Topic,
    pub message: Message,
}

/// Shared in-memory substrate. Create one per simulated world and hand each
/// session its own [`MemoryTransport`] from [`MemoryBroker::transport`].
#[derive(Debug, Default)]
pub struct MemoryBroker {
    clients: DashMap<EntityId, mpsc::Sender<Inbound>>,
    subscriptions: DashMap<Topic, HashSet<EntityId>>,
    presence: DashMap<Topic, BTreeMap<EntityId, Value>>,
    failing_topics: DashMap<Topic, String>,
    reject_connections: AtomicBool,
    publish_log: Mutex<Vec<PublishRecord>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates an unconnected transport bound to this broker.
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            broker: Arc::clone(self),
            identity: RwLock::new(None),
        }
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    /// Makes every later `open` report [`ConnectionState::Failed`].
    pub fn set_reject_connections(&self, reject: bool) {
        self.reject_connections.store(reject, Ordering::Release);
    }

    /// Makes every later subscribe to `topic` fail until cleared.
    pub fn fail_subscribe(&self, topic: Topic, reason: impl Into<String>) {
        self.failing_topics.insert(topic, reason.into());
    }

    pub fn clear_subscribe_failure(&self, topic: &Topic) {
        self.failing_topics.remove(topic);
    }

    /// Severs a client as if its connection dropped: it is told the connection
    /// closed, then removed from every topic and presence set.
    pub async fn drop_client(&self, id: &EntityId) {
        if let Some(sender) = self.sender(id) {
            let _ = sender.try_send(Inbound::Connection(ConnectionState::Closed));
        }
        self.remove_client(id);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Every message accepted so far, in publish order.
    pub async fn published(&self) -> Vec<PublishRecord> {
        self.publish_log.lock().await.clone()
    }

    /// Messages accepted so far from one publisher.
    pub async fn published_by(&self, id: &EntityId) -> Vec<PublishRecord> {
        self.publish_log
            .lock()
            .await
            .iter()
            .filter(|record| &record.message.origin == id)
            .cloned()
            .collect()
    }

    /// Topics a client is currently subscribed to, sorted.
    pub fn topics_of(&self, id: &EntityId) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self
            .subscriptions
            .iter()
            .filter(|entry| entry.value().contains(id))
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    pub fn presence_count(&self, topic: &Topic) -> usize {
        self.presence.get(topic).map(|members| members.len()).unwrap_or(0)
    }

    pub fn is_connected(&self, id: &EntityId) -> bool {
        self.clients.contains_key(id)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn sender(&self, id: &EntityId) -> Option<mpsc::Sender<Inbound>> {
        self.clients.get(id).map(|sender| sender.clone())
    }

    fn subscribers(&self, topic: &Topic) -> Vec<EntityId> {
        self.subscriptions
            .get(topic)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Best-effort hand-off to one client. A full queue drops the delivery.
    fn deliver(&self, id: &EntityId, inbound: Inbound) {
        let Some(sender) = self.sender(id) else {
            return;
        };
        if let Err(e) = sender.try_send(inbound) {
            debug!("Dropping delivery to {}: {}", id, e);
        }
    }

    fn notify_presence(&self, topic: &Topic, action: PresenceAction, member: PresenceMember) {
        for subscriber in self.subscribers(topic) {
            self.deliver(
                &subscriber,
                Inbound::Presence {
                    topic: topic.clone(),
                    action,
                    member: member.clone(),
                },
            );
        }
    }

    fn remove_client(&self, id: &EntityId) {
        self.clients.remove(id);

        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().remove(id);
        }

        let topics: Vec<Topic> = self.presence.iter().map(|entry| entry.key().clone()).collect();
        for topic in topics {
            let removed = self
                .presence
                .get_mut(&topic)
                .and_then(|mut members| members.remove(id));
            if let Some(data) = removed {
                self.notify_presence(
                    &topic,
                    PresenceAction::Leave,
                    PresenceMember {
                        client_id: id.clone(),
                        data,
                    },
                );
            }
        }
    }
}

/// One client's view of a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    identity: RwLock<Option<EntityId>>,
}

impl MemoryTransport {
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    async fn connected_identity(&self) -> Result<EntityId, TransportError> {
        let identity = self.identity.read().await.clone();
        match identity {
            Some(id) if self.broker.is_connected(&id) => Ok(id),
            _ => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        identity: &EntityId,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<(), TransportError> {
        if self.broker.reject_connections.load(Ordering::Acquire) {
            let _ = inbound.try_send(Inbound::Connection(ConnectionState::Failed(
                "broker rejected the connection".to_string(),
            )));
            return Ok(());
        }

        *self.identity.write().await = Some(identity.clone());
        self.broker.clients.insert(identity.clone(), inbound.clone());
        let _ = inbound.try_send(Inbound::Connection(ConnectionState::Connected));
        info!("Memory transport connected as {}", identity);
        Ok(())
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let id = self.connected_identity().await?;
        if let Some(reason) = self.broker.failing_topics.get(topic) {
            return Err(TransportError::Rejected {
                topic: topic.clone(),
                reason: reason.clone(),
            });
        }
        self.broker
            .subscriptions
            .entry(topic.clone())
            .or_default()
            .insert(id);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let id = self.connected_identity().await?;
        if let Some(mut subscribers) = self.broker.subscriptions.get_mut(topic) {
            subscribers.remove(&id);
        }
        Ok(())
    }

    async fn publish(&self, topic: &Topic, message: Message) -> Result<(), TransportError> {
        let id = self.connected_identity().await?;
        // The substrate stamps the origin; a publisher cannot speak for someone else
        let message = Message { origin: id, ..message };

        self.broker.publish_log.lock().await.push(PublishRecord {
            topic: topic.clone(),
            message: message.clone(),
        });

        for subscriber in self.broker.subscribers(topic) {
            self.broker.deliver(
                &subscriber,
                Inbound::Message {
                    topic: topic.clone(),
                    message: message.clone(),
                },
            );
        }
        Ok(())
    }

    async fn presence_enter(&self, topic: &Topic, data: Value) -> Result<(), TransportError> {
        let id = self.connected_identity().await?;
        self.broker
            .presence
            .entry(topic.clone())
            .or_default()
            .insert(id.clone(), data.clone());
        self.broker.notify_presence(
            topic,
            PresenceAction::Enter,
            PresenceMember {
                client_id: id,
                data,
            },
        );
        Ok(())
    }

    async fn presence_leave(&self, topic: &Topic) -> Result<(), TransportError> {
        let id = self.connected_identity().await?;
        let removed = self
            .broker
            .presence
            .get_mut(topic)
            .and_then(|mut members| members.remove(&id));
        if let Some(data) = removed {
            self.broker.notify_presence(
                topic,
                PresenceAction::Leave,
                PresenceMember {
                    client_id: id,
                    data,
                },
            );
        }
        Ok(())
    }

    async fn presence_members(&self, topic: &Topic) -> Result<Vec<PresenceMember>, TransportError> {
        self.connected_identity().await?;
        Ok(self
            .broker
            .presence
            .get(topic)
            .map(|members| {
                members
                    .iter()
                    .map(|(client_id, data)| PresenceMember {
                        client_id: client_id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn close(&self) {
        let identity = self.identity.write().await.take();
        if let Some(id) = identity {
            self.broker.remove_client(&id);
            info!("Memory transport for {} closed", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connect(broker: &Arc<MemoryBroker>, id: &str) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
        let transport = broker.transport();
        let (tx, mut rx) = mpsc::channel(64);
        transport.open(&EntityId::from(id), tx).await.unwrap();
        match rx.recv().await {
            Some(Inbound::Connection(ConnectionState::Connected)) => {}
            other => panic!("expected connected, got {other:?}"),
        }
        (transport, rx)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_including_echo() {
        let broker = MemoryBroker::new();
        let (alice, mut alice_rx) = connect(&broker, "alice").await;
        let (bob, mut bob_rx) = connect(&broker, "bob").await;
        let topic = Topic::new("cell:0:0");

        alice.subscribe(&topic).await.unwrap();
        bob.subscribe(&topic).await.unwrap();
        bob.publish(&topic, Message::new("position", EntityId::from("bob"), json!({})))
            .await
            .unwrap();

        assert!(matches!(alice_rx.try_recv(), Ok(Inbound::Message { .. })));
        assert!(matches!(bob_rx.try_recv(), Ok(Inbound::Message { .. })));
        assert_eq!(broker.published().await.len(), 1);
    }

    #[tokio::test]
    async fn test_origin_is_stamped_by_broker() {
        let broker = MemoryBroker::new();
        let (alice, _rx) = connect(&broker, "alice").await;
        alice
            .publish(&Topic::global(), Message::new("dash", EntityId::from("mallory"), json!({})))
            .await
            .unwrap();

        let records = broker.published().await;
        assert_eq!(records[0].message.origin, EntityId::from("alice"));
    }

    #[tokio::test]
    async fn test_close_leaves_presence_and_notifies() {
        let broker = MemoryBroker::new();
        let presence = Topic::presence();
        let (alice, mut alice_rx) = connect(&broker, "alice").await;
        let (bob, _bob_rx) = connect(&broker, "bob").await;

        alice.subscribe(&presence).await.unwrap();
        bob.presence_enter(&presence, json!({"id": "bob"})).await.unwrap();
        assert_eq!(broker.presence_count(&presence), 1);
        assert!(matches!(
            alice_rx.try_recv(),
            Ok(Inbound::Presence { action: PresenceAction::Enter, .. })
        ));

        bob.close().await;
        assert_eq!(broker.presence_count(&presence), 0);
        assert!(matches!(
            alice_rx.try_recv(),
            Ok(Inbound::Presence { action: PresenceAction::Leave, .. })
        ));
        assert!(bob.publish(&presence, Message::new("x", EntityId::from("bob"), json!({}))).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_subscribe_failure() {
        let broker = MemoryBroker::new();
        let (alice, _rx) = connect(&broker, "alice").await;
        let topic = Topic::new("cell:4:4");

        broker.fail_subscribe(topic.clone(), "quota exceeded");
        assert!(matches!(
            alice.subscribe(&topic).await,
            Err(TransportError::Rejected { .. })
        ));

        broker.clear_subscribe_failure(&topic);
        assert!(alice.subscribe(&topic).await.is_ok());
        assert_eq!(broker.topics_of(&EntityId::from("alice")), vec![topic]);
    }

    #[tokio::test]
    async fn test_rejected_connection_reports_failure() {
        let broker = MemoryBroker::new();
        broker.set_reject_connections(true);
        let transport = broker.transport();
        let (tx, mut rx) = mpsc::channel(4);

        transport.open(&EntityId::from("alice"), tx).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(Inbound::Connection(ConnectionState::Failed(_)))
        ));
        assert!(!broker.is_connected(&EntityId::from("alice")));
    }
}
