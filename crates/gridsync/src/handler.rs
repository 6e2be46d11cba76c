//! Driver-facing collaborators.
//!
//! The session pulls the local snapshot from a [`SnapshotSource`] once per
//! broadcast tick and pushes everything it receives into a [`SessionHandler`].
//! Handlers run on the session loop and must not block.

use crate::cell::Cell;
use crate::error::SyncError;
use crate::types::{Coin, CoinId, EntityId, EntitySnapshot, TournamentState};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Callbacks invoked by a session, at most once per underlying event.
///
/// Every method has an empty default so implementors only override what they
/// care about.
#[allow(unused_variables)]
pub trait SessionHandler: Send + Sync + 'static {
    /// A remote entity's position arrived on a subscribed cell topic.
    fn on_entity_updated(&self, snapshot: EntitySnapshot) {}

    /// Another participant entered presence.
    fn on_entity_joined(&self, snapshot: EntitySnapshot) {}

    /// Another participant left presence.
    fn on_entity_left(&self, id: EntityId) {}

    /// Result of re-querying the presence set after an enter or leave.
    fn on_member_count_changed(&self, count: usize) {}

    fn on_tournament_state(&self, state: TournamentState) {}

    fn on_coin_spawned(&self, coin: Coin) {}

    fn on_coin_collected(&self, coin_id: CoinId) {}

    fn on_remote_dash(&self, source: EntityId) {}

    fn on_remote_hit(&self, target: EntityId, damage: u32) {}

    /// The local round clock advanced by at least one second.
    fn on_round_tick(&self, state: TournamentState) {}

    /// The round went from active to inactive.
    fn on_round_ended(&self, state: TournamentState) {}

    /// The local entity moved into a new cell.
    fn on_cell_changed(&self, cell: Cell) {}

    /// Non-fatal failures, and the fatal one that ends the session.
    fn on_error(&self, error: SyncError) {}
}

/// A handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}

impl<H: SessionHandler> SessionHandler for Arc<H> {
    fn on_entity_updated(&self, snapshot: EntitySnapshot) {
        (**self).on_entity_updated(snapshot)
    }
    fn on_entity_joined(&self, snapshot: EntitySnapshot) {
        (**self).on_entity_joined(snapshot)
    }
    fn on_entity_left(&self, id: EntityId) {
        (**self).on_entity_left(id)
    }
    fn on_member_count_changed(&self, count: usize) {
        (**self).on_member_count_changed(count)
    }
    fn on_tournament_state(&self, state: TournamentState) {
        (**self).on_tournament_state(state)
    }
    fn on_coin_spawned(&self, coin: Coin) {
        (**self).on_coin_spawned(coin)
    }
    fn on_coin_collected(&self, coin_id: CoinId) {
        (**self).on_coin_collected(coin_id)
    }
    fn on_remote_dash(&self, source: EntityId) {
        (**self).on_remote_dash(source)
    }
    fn on_remote_hit(&self, target: EntityId, damage: u32) {
        (**self).on_remote_hit(target, damage)
    }
    fn on_round_tick(&self, state: TournamentState) {
        (**self).on_round_tick(state)
    }
    fn on_round_ended(&self, state: TournamentState) {
        (**self).on_round_ended(state)
    }
    fn on_cell_changed(&self, cell: Cell) {
        (**self).on_cell_changed(cell)
    }
    fn on_error(&self, error: SyncError) {
        (**self).on_error(error)
    }
}

// ============================================================================
// Event Channel
// ============================================================================

/// Every [`SessionHandler`] callback as a value.
#[derive(Debug)]
pub enum SessionEvent {
    EntityUpdated(EntitySnapshot),
    EntityJoined(EntitySnapshot),
    EntityLeft(EntityId),
    MemberCountChanged(usize),
    TournamentState(TournamentState),
    CoinSpawned(Coin),
    CoinCollected(CoinId),
    RemoteDash(EntityId),
    RemoteHit { target: EntityId, damage: u32 },
    RoundTick(TournamentState),
    RoundEnded(TournamentState),
    CellChanged(Cell),
    Error(SyncError),
}

/// Forwards callbacks over an unbounded channel so the driver can consume them
/// from its own task.
///
/// Sends never block; once the receiver is dropped events are discarded.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

impl SessionHandler for ChannelHandler {
    fn on_entity_updated(&self, snapshot: EntitySnapshot) {
        self.emit(SessionEvent::EntityUpdated(snapshot));
    }
    fn on_entity_joined(&self, snapshot: EntitySnapshot) {
        self.emit(SessionEvent::EntityJoined(snapshot));
    }
    fn on_entity_left(&self, id: EntityId) {
        self.emit(SessionEvent::EntityLeft(id));
    }
    fn on_member_count_changed(&self, count: usize) {
        self.emit(SessionEvent::MemberCountChanged(count));
    }
    fn on_tournament_state(&self, state: TournamentState) {
        self.emit(SessionEvent::TournamentState(state));
    }
    fn on_coin_spawned(&self, coin: Coin) {
        self.emit(SessionEvent::CoinSpawned(coin));
    }
    fn on_coin_collected(&self, coin_id: CoinId) {
        self.emit(SessionEvent::CoinCollected(coin_id));
    }
    fn on_remote_dash(&self, source: EntityId) {
        self.emit(SessionEvent::RemoteDash(source));
    }
    fn on_remote_hit(&self, target: EntityId, damage: u32) {
        self.emit(SessionEvent::RemoteHit { target, damage });
    }
    fn on_round_tick(&self, state: TournamentState) {
        self.emit(SessionEvent::RoundTick(state));
    }
    fn on_round_ended(&self, state: TournamentState) {
        self.emit(SessionEvent::RoundEnded(state));
    }
    fn on_cell_changed(&self, cell: Cell) {
        self.emit(SessionEvent::CellChanged(cell));
    }
    fn on_error(&self, error: SyncError) {
        self.emit(SessionEvent::Error(error));
    }
}

// ============================================================================
// Snapshot Source
// ============================================================================

/// Pull side of the driver: the local entity as it is right now.
pub trait SnapshotSource: Send + Sync + 'static {
    /// `None` while the local entity does not exist yet; the tick is skipped.
    fn local_snapshot(&self) -> Option<EntitySnapshot>;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Option<EntitySnapshot> + Send + Sync + 'static,
{
    fn local_snapshot(&self) -> Option<EntitySnapshot> {
        self()
    }
}

/// A snapshot slot the driver overwrites every frame and the session reads
/// every tick. Clones share the same slot.
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    slot: Arc<watch::Sender<Option<EntitySnapshot>>>,
}

impl SharedSnapshot {
    pub fn new(initial: Option<EntitySnapshot>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { slot: Arc::new(tx) }
    }

    pub fn set(&self, snapshot: EntitySnapshot) {
        self.slot.send_replace(Some(snapshot));
    }

    /// Applies `f` to the current snapshot in place, if there is one.
    pub fn update(&self, f: impl FnOnce(&mut EntitySnapshot)) {
        self.slot.send_modify(|slot| {
            if let Some(snapshot) = slot.as_mut() {
                f(snapshot);
            }
        });
    }

    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    pub fn get(&self) -> Option<EntitySnapshot> {
        self.slot.borrow().clone()
    }
}

impl SnapshotSource for SharedSnapshot {
    fn local_snapshot(&self) -> Option<EntitySnapshot> {
        self.get()
    }
}
