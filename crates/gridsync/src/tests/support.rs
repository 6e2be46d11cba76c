//! Shared fixtures for unit and scenario tests.

use crate::cell::Topic;
use crate::config::SyncConfig;
use crate::error::TransportError;
use crate::events::Message;
use crate::handler::{ChannelHandler, SessionEvent, SharedSnapshot};
use crate::session::{Session, SessionHandle};
use crate::transport::{
    ConnectionState, Inbound, MemoryBroker, MemoryTransport, PresenceMember, Transport,
};
use crate::types::{EntityId, EntitySnapshot};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A transport opened directly against a fresh broker, connection signal
/// already consumed.
pub async fn connected_transport(
    id: &str,
) -> (Arc<MemoryBroker>, MemoryTransport, mpsc::Receiver<Inbound>) {
    let broker = MemoryBroker::new();
    let (transport, rx) = raw_client(&broker, id).await;
    (broker, transport, rx)
}

pub fn snapshot(id: &str, x: f64, y: f64) -> EntitySnapshot {
    EntitySnapshot::new(id, id.to_uppercase(), x, y, "#22c55e")
}

/// A connected session plus the pieces a test drives it with.
pub struct TestPeer {
    pub handle: SessionHandle,
    pub source: SharedSnapshot,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestPeer {
    pub fn id(&self) -> EntityId {
        self.handle.local_id().clone()
    }

    pub fn move_to(&self, x: f64, y: f64) {
        self.source.update(|s| {
            s.x = x;
            s.y = y;
        });
    }

    /// Everything the handler received since the last drain.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub async fn join(broker: &Arc<MemoryBroker>, id: &str, x: f64, y: f64) -> TestPeer {
    join_with(broker, SyncConfig::default(), id, x, y).await
}

pub async fn join_with(
    broker: &Arc<MemoryBroker>,
    config: SyncConfig,
    id: &str,
    x: f64,
    y: f64,
) -> TestPeer {
    let local = snapshot(id, x, y);
    let source = SharedSnapshot::new(Some(local.clone()));
    let (handler, events) = ChannelHandler::new();
    let handle = Session::connect(
        config,
        Arc::new(broker.transport()),
        handler,
        source.clone(),
        local,
    )
    .await
    .unwrap();
    TestPeer {
        handle,
        source,
        events,
    }
}

/// Lets every session task drain its queues. Needs paused time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Waits past the next broadcaster tick at the default 50 ms interval.
pub async fn next_broadcast() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}

/// Position messages accepted by the broker from `id`.
pub async fn positions_from(broker: &MemoryBroker, id: &EntityId) -> usize {
    broker
        .published_by(id)
        .await
        .iter()
        .filter(|record| record.message.name == crate::events::POSITION)
        .count()
}

/// A bare transport on `broker` that is not driven by a session.
pub async fn raw_client(broker: &Arc<MemoryBroker>, id: &str) -> (MemoryTransport, mpsc::Receiver<Inbound>) {
    let transport = broker.transport();
    let (tx, mut rx) = mpsc::channel(256);
    transport.open(&EntityId::from(id), tx).await.unwrap();
    assert!(matches!(
        rx.recv().await,
        Some(Inbound::Connection(ConnectionState::Connected))
    ));
    (transport, rx)
}

/// Delegates to a [`MemoryTransport`] but holds every publish for a while
/// before handing it over.
pub struct SlowTransport {
    pub inner: MemoryTransport,
    pub publish_delay: Duration,
    pub publishes_started: AtomicUsize,
}

impl SlowTransport {
    pub fn new(inner: MemoryTransport, publish_delay: Duration) -> Self {
        Self {
            inner,
            publish_delay,
            publishes_started: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.publishes_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn open(
        &self,
        identity: &EntityId,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<(), TransportError> {
        self.inner.open(identity, inbound).await
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        self.inner.subscribe(topic).await
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        self.inner.unsubscribe(topic).await
    }

    async fn publish(&self, topic: &Topic, message: Message) -> Result<(), TransportError> {
        self.publishes_started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.publish_delay).await;
        self.inner.publish(topic, message).await
    }

    async fn presence_enter(&self, topic: &Topic, data: Value) -> Result<(), TransportError> {
        self.inner.presence_enter(topic, data).await
    }

    async fn presence_leave(&self, topic: &Topic) -> Result<(), TransportError> {
        self.inner.presence_leave(topic).await
    }

    async fn presence_members(&self, topic: &Topic) -> Result<Vec<PresenceMember>, TransportError> {
        self.inner.presence_members(topic).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// A transport whose `open` never reports anything. The delivery queue is held
/// open so the session waits for the full connect timeout.
#[derive(Default)]
pub struct SilentTransport {
    held: tokio::sync::Mutex<Option<mpsc::Sender<Inbound>>>,
}

#[async_trait]
impl Transport for SilentTransport {
    async fn open(
        &self,
        _identity: &EntityId,
        inbound: mpsc::Sender<Inbound>,
    ) -> Result<(), TransportError> {
        *self.held.lock().await = Some(inbound);
        Ok(())
    }

    async fn subscribe(&self, _topic: &Topic) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn unsubscribe(&self, _topic: &Topic) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn publish(&self, _topic: &Topic, _message: Message) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn presence_enter(&self, _topic: &Topic, _data: Value) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn presence_leave(&self, _topic: &Topic) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn presence_members(&self, _topic: &Topic) -> Result<Vec<PresenceMember>, TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn close(&self) {}
}
