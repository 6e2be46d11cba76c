//! Position throttling and broadcaster cancellation.

use super::support::*;
use crate::config::SyncConfig;
use crate::handler::{NoopHandler, SharedSnapshot};
use crate::session::Session;
use crate::transport::MemoryBroker;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_small_moves_are_throttled() {
    let broker = MemoryBroker::new();
    let peer = join(&broker, "p1", 0.0, 0.0).await;
    let id = peer.id();

    peer.handle.start_broadcast().await.unwrap();
    settle().await;
    assert_eq!(positions_from(&broker, &id).await, 1);

    peer.move_to(0.0, 0.5);
    next_broadcast().await;
    assert_eq!(positions_from(&broker, &id).await, 1);

    peer.move_to(2.0, 0.0);
    next_broadcast().await;
    assert_eq!(positions_from(&broker, &id).await, 2);

    assert_eq!(peer.handle.stats().await.unwrap().positions_published, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stationary_entity_publishes_once() {
    let broker = MemoryBroker::new();
    let peer = join(&broker, "p1", 250.0, 250.0).await;

    peer.handle.start_broadcast().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(positions_from(&broker, &peer.id()).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_broadcast_prevents_further_publishes() {
    let broker = MemoryBroker::new();
    let peer = join(&broker, "p1", 0.0, 0.0).await;
    let id = peer.id();

    peer.handle.start_broadcast().await.unwrap();
    settle().await;
    peer.handle.stop_broadcast().await.unwrap();
    let before = positions_from(&broker, &id).await;

    peer.move_to(900.0, 900.0);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(positions_from(&broker, &id).await, before);
    // The cell is only re-evaluated by the broadcaster
    assert_eq!(
        peer.handle.current_cell().await.unwrap(),
        Some(crate::Cell::new(0, 0))
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_in_flight_tick() {
    let broker = MemoryBroker::new();
    let slow = Arc::new(SlowTransport::new(
        broker.transport(),
        Duration::from_millis(200),
    ));
    let local = snapshot("p1", 10.0, 10.0);
    let id = local.id.clone();
    let handle = Session::connect(
        SyncConfig::default(),
        Arc::clone(&slow),
        NoopHandler,
        SharedSnapshot::new(Some(local.clone())),
        local,
    )
    .await
    .unwrap();

    handle.start_broadcast().await.unwrap();
    settle().await;
    // The first tick is parked inside publish
    assert_eq!(slow.started(), 1);
    assert_eq!(positions_from(&broker, &id).await, 0);

    handle.disconnect().await.unwrap();
    let after_disconnect = positions_from(&broker, &id).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(positions_from(&broker, &id).await, after_disconnect);
    assert_eq!(slow.started(), 1);
    assert!(handle.is_closed());
}
