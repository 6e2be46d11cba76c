//! Subscription set behaviour observed through whole sessions.

use super::support::*;
use crate::cell::{Cell, Topic};
use crate::events::{Message, POSITION};
use crate::handler::SessionEvent;
use crate::transport::{MemoryBroker, Transport};
use std::collections::HashSet;
use std::time::Duration;

fn sorted(topics: HashSet<Topic>) -> Vec<Topic> {
    let mut topics: Vec<Topic> = topics.into_iter().collect();
    topics.sort();
    topics
}

fn with_globals(cell: Cell) -> Vec<Topic> {
    let mut topics = cell.neighborhood_topics();
    topics.insert(Topic::presence());
    topics.insert(Topic::global());
    sorted(topics)
}

#[tokio::test(start_paused = true)]
async fn test_live_set_matches_neighborhood_after_each_move() {
    let broker = MemoryBroker::new();
    let peer = join(&broker, "p1", 100.0, 100.0).await;
    peer.handle.start_broadcast().await.unwrap();

    let path = [
        (100.0, 100.0),
        (450.0, 100.0),
        (450.0, 450.0),
        (-20.0, 450.0),
        (-900.0, -1300.0),
    ];
    for (x, y) in path {
        peer.move_to(x, y);
        next_broadcast().await;

        let cell = Cell::of(x, y, 400.0);
        assert_eq!(peer.handle.current_cell().await.unwrap(), Some(cell));
        assert_eq!(
            peer.handle.subscriptions().await.unwrap(),
            sorted(cell.neighborhood_topics())
        );
        assert_eq!(broker.topics_of(&peer.id()), with_globals(cell));
    }
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_leaves_no_leaked_subscriptions() {
    let broker = MemoryBroker::new();
    let mut peer = join(&broker, "p1", 600.0, 600.0).await;
    peer.handle.start_broadcast().await.unwrap();
    next_broadcast().await;

    peer.move_to(600.0, 1000.0);
    next_broadcast().await;
    assert_eq!(peer.handle.current_cell().await.unwrap(), Some(Cell::new(1, 2)));

    peer.move_to(600.0, 600.0);
    next_broadcast().await;

    assert_eq!(
        peer.handle.subscriptions().await.unwrap(),
        sorted(Cell::new(1, 1).neighborhood_topics())
    );
    assert_eq!(broker.topics_of(&peer.id()), with_globals(Cell::new(1, 1)));

    let cells: Vec<Cell> = peer
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::CellChanged(cell) => Some(cell),
            _ => None,
        })
        .collect();
    assert_eq!(cells, vec![Cell::new(1, 1), Cell::new(1, 2), Cell::new(1, 1)]);

    let stats = peer.handle.stats().await.unwrap();
    assert_eq!(stats.cell_transitions, 3);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_reported_and_retried() {
    let broker = MemoryBroker::new();
    let failing = Cell::new(2, 2).topic();
    broker.fail_subscribe(failing.clone(), "topic quota exceeded");

    let mut peer = join(&broker, "p1", 600.0, 600.0).await;

    let failures: Vec<Topic> = peer
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Error(crate::SyncError::SubscribeFailure { topic, .. }) => Some(topic),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![failing.clone()]);
    assert_eq!(peer.handle.subscriptions().await.unwrap().len(), 8);
    assert_eq!(peer.handle.stats().await.unwrap().subscribe_failures, 1);

    broker.clear_subscribe_failure(&failing);
    peer.handle.start_broadcast().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let live = peer.handle.subscriptions().await.unwrap();
    assert_eq!(live.len(), 9);
    assert!(live.contains(&failing));
    // The retry stayed in the same cell
    assert_eq!(peer.handle.stats().await.unwrap().cell_transitions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_positions_only_reach_neighbors() {
    let broker = MemoryBroker::new();
    let mut near = join(&broker, "near", 100.0, 100.0).await;
    let mut mover = join(&broker, "mover", 500.0, 100.0).await;
    let mut far = join(&broker, "far", 3000.0, 3000.0).await;

    mover.handle.start_broadcast().await.unwrap();
    next_broadcast().await;

    let seen_by = |events: Vec<SessionEvent>| -> Vec<String> {
        events
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::EntityUpdated(snapshot) => Some(snapshot.id.to_string()),
                _ => None,
            })
            .collect()
    };

    assert_eq!(seen_by(near.drain()), vec!["mover".to_string()]);
    assert!(seen_by(far.drain()).is_empty());
    // Own echo is never reported back
    assert!(seen_by(mover.drain()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_position_is_dropped_and_counted() {
    let broker = MemoryBroker::new();
    let mut peer = join(&broker, "p1", 100.0, 100.0).await;
    let (rogue, _rx) = raw_client(&broker, "rogue").await;
    peer.drain();

    let garbage = Message::new(POSITION, "rogue".into(), serde_json::json!({"x": "nope"}));
    rogue.publish(&Cell::new(0, 0).topic(), garbage).await.unwrap();

    let mut impostor = snapshot("someone_else", 10.0, 10.0);
    impostor.hp = 50;
    let spoofed = Message::position(&impostor).unwrap();
    rogue.publish(&Cell::new(0, 0).topic(), spoofed).await.unwrap();
    settle().await;

    assert!(peer.drain().is_empty());
    assert_eq!(peer.handle.stats().await.unwrap().malformed_dropped, 2);
}
