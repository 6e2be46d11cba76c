//! # Session
//!
//! A session is a single task that owns every piece of sync state: the current
//! cell, the live subscription set, the last published snapshot, presence, the
//! coin registry, and the round clock. Nothing else touches that state.
//!
//! The task reacts to four kinds of triggers, one at a time:
//!
//! 1. commands from a [`SessionHandle`]
//! 2. broadcaster, round clock, and resync timer ticks
//! 3. presence count query answers
//! 4. deliveries from the transport
//!
//! Because triggers never interleave, a command handled after a tick always
//! observes that tick's effects in full. In particular, once
//! [`SessionHandle::disconnect`] returns, the in-flight tick (if any) has
//! finished and no further publish can happen.
//!
//! ## Lifecycle
//!
//! ```text
//! connect ──► Connected ──► (disconnect | transport closed) ──► Closed
//!    │
//!    └─ failure / timeout ──► Err(TransportFailure)
//! ```

use crate::broadcaster::{PositionBroadcaster, TickOutcome};
use crate::bus::GlobalEventBus;
use crate::cell::{Cell, Topic};
use crate::clock::{ClockChange, RoundClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, TransportError};
use crate::events::{CombatEvent, EconomyEvent, GlobalEvent, LocalEvent, Message};
use crate::handler::{SessionHandler, SnapshotSource};
use crate::presence::{PresenceChange, PresenceTracker};
use crate::stats::SyncStats;
use crate::subscription::{SubscriptionSet, TransitionReport};
use crate::transport::{ConnectionState, Inbound, PresenceMember, Transport};
use crate::types::{EntityId, EntitySnapshot, TournamentState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const COMMAND_CAPACITY: usize = 64;

type RefreshResult = (u64, Result<Vec<PresenceMember>, TransportError>);

/// Round clock view returned by [`SessionHandle::round_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoundStatus {
    pub state: Option<TournamentState>,
    /// Age of the last state received or published
    pub since_sync: Option<Duration>,
    /// Member currently keeping the clock for everyone
    pub authority: Option<EntityId>,
    pub is_authority: bool,
}

#[derive(Debug)]
enum Command {
    StartBroadcast(oneshot::Sender<()>),
    StopBroadcast(oneshot::Sender<()>),
    Publish(LocalEvent, oneshot::Sender<Result<(), SyncError>>),
    Stats(oneshot::Sender<SyncStats>),
    CurrentCell(oneshot::Sender<Option<Cell>>),
    Subscriptions(oneshot::Sender<Vec<Topic>>),
    RoundState(oneshot::Sender<RoundStatus>),
    Disconnect(oneshot::Sender<()>),
}

/// Entry point for creating sessions.
pub struct Session;

impl Session {
    /// Connects to the substrate as `local.id` and starts the session task.
    ///
    /// Resolves once the transport reports connected and the presence, global,
    /// and initial cell subscriptions have been attempted. Failures of those
    /// subscriptions are reported to `handler.on_error` and do not fail the
    /// connect; a transport that fails or does not connect within
    /// `connect_timeout_ms` does.
    pub async fn connect<T, H, S>(
        config: SyncConfig,
        transport: Arc<T>,
        handler: H,
        source: S,
        local: EntitySnapshot,
    ) -> Result<SessionHandle, SyncError>
    where
        T: Transport,
        H: SessionHandler,
        S: SnapshotSource,
    {
        config.validate()?;
        local
            .validate()
            .map_err(|e| SyncError::InvalidSnapshot(e.to_string()))?;

        let transport: Arc<dyn Transport> = transport;
        let local_id = local.id.clone();
        let (inbound_tx, mut inbound_rx) = mpsc::channel(config.inbound_capacity);

        info!("Connecting as {}", local_id);
        transport.open(&local_id, inbound_tx).await?;

        let connected =
            tokio::time::timeout(config.connect_timeout(), wait_connected(&mut inbound_rx)).await;
        match connected {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Connection failed for {}: {}", local_id, e);
                transport.close().await;
                return Err(e);
            }
            Err(_) => {
                error!("Connection timed out for {}", local_id);
                transport.close().await;
                return Err(SyncError::TransportFailure(format!(
                    "not connected after {:?}",
                    config.connect_timeout()
                )));
            }
        }
        info!("Connected as {}", local_id);

        let closed = Arc::new(AtomicBool::new(false));
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let mut actor = SessionActor {
            local_id: local_id.clone(),
            subscriptions: SubscriptionSet::new(config.subscribe_retry()),
            broadcaster: PositionBroadcaster::new(
                local_id.clone(),
                config.broadcast_interval(),
                config.cell_size,
                config.movement_threshold,
            ),
            presence: PresenceTracker::new(local_id.clone()),
            bus: GlobalEventBus::new(local_id.clone()),
            clock: RoundClock::new(config.round_tick()),
            stats: SyncStats::default(),
            transport,
            handler: Box::new(handler),
            source: Box::new(source),
            closed: Arc::clone(&closed),
            refresh_tx,
            config,
        };
        actor.setup(&local).await;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        tokio::spawn(actor.run(command_rx, inbound_rx, refresh_rx));

        Ok(SessionHandle {
            local_id,
            commands: command_tx,
            closed,
        })
    }
}

async fn wait_connected(inbound: &mut mpsc::Receiver<Inbound>) -> Result<(), SyncError> {
    loop {
        match inbound.recv().await {
            Some(Inbound::Connection(ConnectionState::Connected)) => return Ok(()),
            Some(Inbound::Connection(ConnectionState::Failed(reason))) => {
                return Err(SyncError::TransportFailure(reason))
            }
            Some(Inbound::Connection(ConnectionState::Closed)) | None => {
                return Err(SyncError::TransportFailure(
                    "connection closed before it was established".to_string(),
                ))
            }
            Some(other) => trace!("Discarding delivery before connect: {:?}", other),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable control surface of a running session.
///
/// Every call after the session reached its terminal state returns
/// [`SyncError::SessionClosed`], except [`SessionHandle::disconnect`] which is
/// idempotent.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    local_id: EntityId,
    commands: mpsc::Sender<Command>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn local_id(&self) -> &EntityId {
        &self.local_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Starts the position broadcaster. Does nothing if it is running.
    pub async fn start_broadcast(&self) -> Result<(), SyncError> {
        self.request(Command::StartBroadcast).await
    }

    /// Stops the position broadcaster. When this returns no further position
    /// is published until it is started again.
    pub async fn stop_broadcast(&self) -> Result<(), SyncError> {
        self.request(Command::StopBroadcast).await
    }

    /// Publishes a local event on the global bus. Fire-and-forget: `Ok` means
    /// the transport accepted it.
    pub async fn publish(&self, event: LocalEvent) -> Result<(), SyncError> {
        self.request(|tx| Command::Publish(event, tx)).await?
    }

    pub async fn stats(&self) -> Result<SyncStats, SyncError> {
        self.request(Command::Stats).await
    }

    pub async fn current_cell(&self) -> Result<Option<Cell>, SyncError> {
        self.request(Command::CurrentCell).await
    }

    /// Live cell topics, sorted.
    pub async fn subscriptions(&self) -> Result<Vec<Topic>, SyncError> {
        self.request(Command::Subscriptions).await
    }

    pub async fn round_state(&self) -> Result<RoundStatus, SyncError> {
        self.request(Command::RoundState).await
    }

    /// Stops broadcasting, leaves presence, unsubscribes every cell topic, and
    /// closes the transport, in that order.
    pub async fn disconnect(&self) -> Result<(), SyncError> {
        if self.is_closed() {
            return Ok(());
        }
        match self.request(Command::Disconnect).await {
            Ok(()) | Err(SyncError::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SyncError> {
        if self.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)
    }
}

// ============================================================================
// Actor
// ============================================================================

struct SessionActor {
    local_id: EntityId,
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    handler: Box<dyn SessionHandler>,
    source: Box<dyn SnapshotSource>,
    subscriptions: SubscriptionSet,
    broadcaster: PositionBroadcaster,
    presence: PresenceTracker,
    bus: GlobalEventBus,
    clock: RoundClock,
    stats: SyncStats,
    closed: Arc<AtomicBool>,
    refresh_tx: mpsc::UnboundedSender<RefreshResult>,
}

enum Flow {
    Continue,
    Stop,
}

impl SessionActor {
    /// Presence, global topic, then the first cell transition.
    async fn setup(&mut self, local: &EntitySnapshot) {
        if let Err(e) = self.presence.join(self.transport.as_ref(), local).await {
            warn!("Presence setup failed: {}", e);
            self.stats.subscribe_failures += 1;
            self.handler.on_error(SyncError::SubscribeFailure {
                topic: self.presence.topic().clone(),
                source: e,
            });
        }
        self.stats.member_count = self.presence.member_count();

        if let Err(e) = self.bus.join(self.transport.as_ref()).await {
            warn!("Global topic setup failed: {}", e);
            self.stats.subscribe_failures += 1;
            self.handler.on_error(SyncError::SubscribeFailure {
                topic: self.bus.topic().clone(),
                source: e,
            });
        }

        let cell = Cell::of(local.x, local.y, self.config.cell_size);
        let report = self
            .subscriptions
            .on_cell_might_have_changed(cell, self.transport.as_ref())
            .await;
        self.record_transition(report);
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<Inbound>,
        mut refresh: mpsc::UnboundedReceiver<RefreshResult>,
    ) {
        let round_period = self.config.round_tick();
        let mut round_tick = tokio::time::interval_at(Instant::now() + round_period, round_period);
        round_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let resync_period = self.config.state_resync_interval();
        let mut resync = tokio::time::interval_at(Instant::now() + resync_period, resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let flow = tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Every handle for {} dropped", self.local_id);
                        self.shutdown().await;
                        Flow::Stop
                    }
                },
                _ = self.broadcaster.next_tick() => {
                    self.on_broadcast_tick().await;
                    Flow::Continue
                }
                _ = round_tick.tick() => {
                    self.on_round_tick().await;
                    Flow::Continue
                }
                _ = resync.tick() => {
                    self.on_resync().await;
                    Flow::Continue
                }
                Some((generation, result)) = refresh.recv() => {
                    self.on_member_query(generation, result);
                    Flow::Continue
                }
                Some(delivery) = inbound.recv() => self.handle_inbound(delivery).await,
            };

            if let Flow::Stop = flow {
                break;
            }
        }
        debug!("Session task for {} finished", self.local_id);
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::StartBroadcast(ack) => {
                self.broadcaster.start();
                let _ = ack.send(());
            }
            Command::StopBroadcast(ack) => {
                self.broadcaster.stop();
                let _ = ack.send(());
            }
            Command::Publish(event, reply) => {
                let result = self.publish_local(event).await;
                let _ = reply.send(result);
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats.clone());
            }
            Command::CurrentCell(reply) => {
                let _ = reply.send(self.subscriptions.current_cell());
            }
            Command::Subscriptions(reply) => {
                let _ = reply.send(self.subscriptions.topics());
            }
            Command::RoundState(reply) => {
                let _ = reply.send(RoundStatus {
                    state: self.clock.state(),
                    since_sync: self.clock.since_sync(),
                    authority: self.presence.authority().cloned(),
                    is_authority: self.presence.is_authority(),
                });
            }
            Command::Disconnect(ack) => {
                self.shutdown().await;
                let _ = ack.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    async fn publish_local(&mut self, event: LocalEvent) -> Result<(), SyncError> {
        if let LocalEvent::TournamentState(state) = &event {
            let change = self.clock.apply(*state);
            self.report_clock(change);
        }
        let message = self.bus.outgoing(event)?;
        self.publish_global(message).await
    }

    async fn publish_global(&mut self, message: Message) -> Result<(), SyncError> {
        debug!("Publishing {} on {}", message.name, self.bus.topic());
        self.transport.publish(self.bus.topic(), message).await?;
        self.stats.global_events_published += 1;
        Ok(())
    }

    async fn on_broadcast_tick(&mut self) {
        let outcome = self
            .broadcaster
            .tick(
                self.source.as_ref(),
                &mut self.subscriptions,
                self.transport.as_ref(),
            )
            .await;

        match outcome {
            TickOutcome::Skipped => {}
            TickOutcome::Invalid(e) => {
                self.handler.on_error(SyncError::InvalidSnapshot(e.to_string()));
            }
            TickOutcome::Held { transition } => self.record_transition(transition),
            TickOutcome::Published { transition, .. } => {
                self.record_transition(transition);
                self.stats.positions_published += 1;
            }
            TickOutcome::PublishFailed { transition, .. } => self.record_transition(transition),
        }
    }

    fn record_transition(&mut self, report: TransitionReport) {
        if report.is_noop() {
            return;
        }
        let entered = report.to.filter(|_| report.changed_cell());
        if entered.is_some() {
            self.stats.cell_transitions += 1;
        }
        self.stats.subscribe_failures += report.subscribe_failures.len() as u64;
        self.stats.unsubscribe_failures += report.unsubscribe_failures.len() as u64;

        for (topic, source) in report
            .subscribe_failures
            .into_iter()
            .chain(report.unsubscribe_failures)
        {
            self.handler
                .on_error(SyncError::SubscribeFailure { topic, source });
        }
        if let Some(cell) = entered {
            self.handler.on_cell_changed(cell);
        }
    }

    // ------------------------------------------------------------------------
    // Round clock
    // ------------------------------------------------------------------------

    async fn on_round_tick(&mut self) {
        let change = self.clock.tick();
        self.report_clock(change);

        if let ClockChange::Ended(state) = change {
            if self.presence.is_authority() {
                info!("Publishing end of round as clock authority");
                self.publish_state(state).await;
            }
        }
    }

    async fn on_resync(&mut self) {
        if !self.presence.is_authority() || !self.clock.is_active() {
            return;
        }
        if let Some(state) = self.clock.state() {
            trace!("Resyncing round clock at {}s", state.time_left_seconds);
            self.publish_state(state).await;
        }
    }

    async fn publish_state(&mut self, state: TournamentState) {
        let result = match self.bus.outgoing(LocalEvent::TournamentState(state)) {
            Ok(message) => self.publish_global(message).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Round state publish failed: {}", e);
        }
    }

    fn report_clock(&mut self, change: ClockChange) {
        match change {
            ClockChange::Unchanged => {}
            ClockChange::Ticked(state) => self.handler.on_round_tick(state),
            ClockChange::Ended(state) => {
                // Coins never carry over into the next round
                self.bus.clear();
                self.handler.on_round_ended(state);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    async fn handle_inbound(&mut self, delivery: Inbound) -> Flow {
        match delivery {
            Inbound::Connection(ConnectionState::Connected) => {
                debug!("Transport reported connected again");
                Flow::Continue
            }
            Inbound::Connection(ConnectionState::Failed(reason)) => {
                self.fail(SyncError::TransportFailure(reason)).await;
                Flow::Stop
            }
            Inbound::Connection(ConnectionState::Closed) => {
                self.fail(SyncError::TransportFailure(
                    "transport closed the connection".to_string(),
                ))
                .await;
                Flow::Stop
            }
            Inbound::Message { topic, message } => {
                if &topic == self.bus.topic() {
                    self.on_global_message(&message);
                } else if topic.is_cell() {
                    self.on_cell_message(&topic, &message);
                } else {
                    trace!(topic = %topic, "Ignoring message on unknown topic");
                }
                Flow::Continue
            }
            Inbound::Presence {
                topic,
                action,
                member,
            } => {
                if &topic != self.presence.topic() {
                    return Flow::Continue;
                }
                match self.presence.on_presence(action, &member) {
                    PresenceChange::Joined(snapshot) => self.handler.on_entity_joined(snapshot),
                    PresenceChange::Left(id) => self.handler.on_entity_left(id),
                    PresenceChange::Ignored => {}
                }
                self.refresh_member_count();
                Flow::Continue
            }
        }
    }

    fn on_cell_message(&mut self, topic: &Topic, message: &Message) {
        if !self.subscriptions.is_live(topic) {
            trace!(topic = %topic, "Dropping delivery for untracked cell");
            return;
        }
        if message.is_from(&self.local_id) {
            return;
        }
        match message.decode_position() {
            Ok(snapshot) if snapshot.id == message.origin => {
                self.stats.deliveries_routed += 1;
                self.handler.on_entity_updated(snapshot);
            }
            Ok(snapshot) => {
                self.stats.malformed_dropped += 1;
                warn!(
                    topic = %topic,
                    "Dropping position for {} published by {}",
                    snapshot.id,
                    message.origin
                );
            }
            Err(e) => {
                self.stats.malformed_dropped += 1;
                warn!(topic = %topic, "Dropping malformed position: {}", e);
            }
        }
    }

    fn on_global_message(&mut self, message: &Message) {
        let event = match self.bus.accept(message) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                self.stats.malformed_dropped += 1;
                warn!("Dropping malformed {} from {}: {}", message.name, message.origin, e);
                return;
            }
        };

        self.stats.deliveries_routed += 1;
        match event {
            GlobalEvent::Tournament(state) => {
                let change = self.clock.apply(state);
                self.handler.on_tournament_state(state);
                self.report_clock(change);
            }
            GlobalEvent::Combat(CombatEvent::Dash { source }) => self.handler.on_remote_dash(source),
            GlobalEvent::Combat(CombatEvent::Hit { target, damage }) => {
                self.handler.on_remote_hit(target, damage)
            }
            GlobalEvent::Economy(EconomyEvent::CoinSpawned(coin)) => {
                self.handler.on_coin_spawned(coin)
            }
            GlobalEvent::Economy(EconomyEvent::CoinCollected(id)) => {
                self.handler.on_coin_collected(id)
            }
        }
    }

    /// Queries the presence set off the loop; the answer comes back through
    /// the refresh channel.
    fn refresh_member_count(&mut self) {
        let generation = self.presence.begin_refresh();
        let transport = Arc::clone(&self.transport);
        let topic = self.presence.topic().clone();
        let answers = self.refresh_tx.clone();
        tokio::spawn(async move {
            let result = transport.presence_members(&topic).await;
            let _ = answers.send((generation, result));
        });
    }

    fn on_member_query(
        &mut self,
        generation: u64,
        result: Result<Vec<PresenceMember>, TransportError>,
    ) {
        match result {
            Ok(members) => {
                if let Some(count) = self.presence.apply_refresh(generation, members) {
                    self.stats.member_count = count;
                    self.handler.on_member_count_changed(count);
                }
            }
            Err(e) => debug!("Presence query failed: {}", e),
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    async fn shutdown(&mut self) {
        info!("Disconnecting {}", self.local_id);
        self.broadcaster.stop();

        if let Err(e) = self.presence.leave(self.transport.as_ref()).await {
            warn!("Presence leave failed: {}", e);
        }
        let failures = self.subscriptions.clear(self.transport.as_ref()).await;
        self.stats.unsubscribe_failures += failures.len() as u64;

        self.transport.close().await;
        self.bus.clear();
        self.closed.store(true, Ordering::Release);
        info!("Disconnected {}", self.local_id);
    }

    async fn fail(&mut self, err: SyncError) {
        error!("Session {} lost its transport: {}", self.local_id, err);
        self.broadcaster.stop();
        self.transport.close().await;
        self.closed.store(true, Ordering::Release);
        self.handler.on_error(err);
    }
}
