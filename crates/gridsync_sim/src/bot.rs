//! # Simulated Players
//!
//! A [`Bot`] is one participant: a [`BotModel`] holding its view of the game,
//! a sync session on the shared broker, and a task loop that advances the model
//! every frame and feeds session events back into it.
//!
//! The model is plain data with no I/O so the game rules can be tested without
//! a runtime. Everything it wants published comes back from [`BotModel::step`]
//! as [`LocalEvent`]s.

use crate::config::SimulationSettings;
use crate::shutdown::ShutdownState;
use gridsync::{
    ChannelHandler, Coin, CoinId, EntityId, EntitySnapshot, LocalEvent, MemoryBroker, Session,
    SessionEvent, SessionHandle, SharedSnapshot, SyncConfig, SyncError, SyncStats,
    TournamentState, MAX_HP,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const COLORS: [&str; 8] = [
    "#ef4444", "#f97316", "#eab308", "#22c55e", "#06b6d4", "#3b82f6", "#8b5cf6", "#ec4899",
];

/// Chance per second of picking a new wandering direction.
const TURN_CHANCE: f64 = 0.5;

/// Spawn positions keep this far from the world edge.
const SPAWN_MARGIN: f64 = 100.0;

/// Result of a finished round as seen by one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub winner: Option<EntityId>,
    pub winner_name: Option<String>,
    pub prize_pool: f64,
}

/// One participant's view of the game.
#[derive(Debug)]
pub struct BotModel {
    me: EntitySnapshot,
    remotes: HashMap<EntityId, EntitySnapshot>,
    coins: HashMap<CoinId, Coin>,
    round: Option<TournamentState>,
    member_count: usize,
    heading: f64,
    dash_left: f64,
    /// Targets already hit during the current dash
    struck: HashSet<EntityId>,
    settings: SimulationSettings,
    coins_collected: u32,
    hits_landed: u32,
}

impl BotModel {
    pub fn new(me: EntitySnapshot, settings: SimulationSettings) -> Self {
        Self {
            me,
            remotes: HashMap::new(),
            coins: HashMap::new(),
            round: None,
            member_count: 1,
            heading: 0.0,
            dash_left: 0.0,
            struck: HashSet::new(),
            settings,
            coins_collected: 0,
            hits_landed: 0,
        }
    }

    pub fn me(&self) -> &EntitySnapshot {
        &self.me
    }

    pub fn remote(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.remotes.get(id)
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    pub fn coin_count(&self) -> usize {
        self.coins.len()
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    pub fn round_active(&self) -> bool {
        self.round.map_or(false, |r| r.round_active)
    }

    pub fn coins_collected(&self) -> u32 {
        self.coins_collected
    }

    pub fn hits_landed(&self) -> u32 {
        self.hits_landed
    }

    /// Starts a dash if the local entity is alive and not already dashing.
    pub fn dash(&mut self) -> Option<LocalEvent> {
        if !self.me.is_alive || self.me.is_dashing {
            return None;
        }
        self.me.is_dashing = true;
        self.dash_left = self.settings.dash_duration_ms as f64 / 1000.0;
        self.struck.clear();
        Some(LocalEvent::Dash)
    }

    /// Advances the local entity by `dt` seconds.
    ///
    /// Hits are applied to the local copy of the target before they are
    /// returned for publishing.
    pub fn step<R: Rng>(&mut self, dt: f64, rng: &mut R) -> Vec<LocalEvent> {
        let mut out = Vec::new();
        if !self.me.is_alive {
            return out;
        }

        if self.me.is_dashing {
            self.dash_left -= dt;
            if self.dash_left <= 0.0 {
                self.me.is_dashing = false;
                self.struck.clear();
            }
        } else if rng.gen_bool((self.settings.dash_chance * dt).clamp(0.0, 1.0)) {
            out.extend(self.dash());
        }

        if rng.gen_bool((TURN_CHANCE * dt).clamp(0.0, 1.0)) {
            self.heading = rng.gen_range(0.0..TAU);
        }
        self.advance(dt);

        if !self.round_active() {
            return out;
        }

        if self.me.is_dashing {
            out.extend(self.strike());
        }
        out.extend(self.collect());
        out
    }

    fn advance(&mut self, dt: f64) {
        let mut speed = self.settings.speed;
        if self.me.is_dashing {
            speed *= self.settings.dash_multiplier;
        }
        let (sin, cos) = self.heading.sin_cos();
        let margin = self.settings.entity_size;
        let max_x = self.settings.world_width - margin;
        let max_y = self.settings.world_height - margin;

        let x = self.me.x + cos * speed * dt;
        let y = self.me.y + sin * speed * dt;
        self.me.x = x.clamp(margin, max_x);
        self.me.y = y.clamp(margin, max_y);

        // Bounce off the walls instead of sliding along them
        if x != self.me.x {
            self.heading = std::f64::consts::PI - self.heading;
        }
        if y != self.me.y {
            self.heading = -self.heading;
        }
    }

    fn strike(&mut self) -> Vec<LocalEvent> {
        let radius = self.settings.hit_radius;
        let damage = self.settings.hit_damage;
        let targets: Vec<EntityId> = self
            .remotes
            .values()
            .filter(|r| r.is_alive && !self.struck.contains(&r.id))
            .filter(|r| distance(&self.me, r.x, r.y) < radius)
            .map(|r| r.id.clone())
            .collect();

        targets
            .into_iter()
            .map(|target| {
                self.take_hit(&target, damage);
                self.struck.insert(target.clone());
                self.hits_landed += 1;
                LocalEvent::Hit { target, damage }
            })
            .collect()
    }

    fn collect(&mut self) -> Vec<LocalEvent> {
        let radius = self.settings.collect_radius;
        let reached: Vec<CoinId> = self
            .coins
            .values()
            .filter(|c| distance(&self.me, c.x, c.y) < radius)
            .map(|c| c.id.clone())
            .collect();

        reached
            .into_iter()
            .map(|id| {
                self.coins.remove(&id);
                self.me.score += 1;
                self.coins_collected += 1;
                LocalEvent::CoinCollect(id)
            })
            .collect()
    }

    fn take_hit(&mut self, target: &EntityId, damage: u32) {
        let entity = if target == &self.me.id {
            Some(&mut self.me)
        } else {
            self.remotes.get_mut(target)
        };
        if let Some(entity) = entity {
            let damage = u8::try_from(damage).unwrap_or(u8::MAX);
            entity.hp = entity.hp.saturating_sub(damage);
            if entity.hp == 0 {
                entity.is_alive = false;
                entity.is_dashing = false;
            }
        }
    }

    /// Feeds one session event into the model. Returns the result when the
    /// event ended a round.
    pub fn apply(&mut self, event: SessionEvent) -> Option<RoundResult> {
        match event {
            SessionEvent::EntityJoined(snapshot) | SessionEvent::EntityUpdated(snapshot) => {
                if snapshot.id != self.me.id {
                    self.remotes.insert(snapshot.id.clone(), snapshot);
                }
            }
            SessionEvent::EntityLeft(id) => {
                self.remotes.remove(&id);
            }
            SessionEvent::MemberCountChanged(count) => self.member_count = count,
            SessionEvent::TournamentState(state) | SessionEvent::RoundTick(state) => {
                self.round = Some(state);
            }
            SessionEvent::RoundEnded(state) => {
                self.round = Some(state);
                let result = self.finish_round(state.prize_pool);
                self.reset();
                return Some(result);
            }
            SessionEvent::CoinSpawned(coin) => {
                self.coins.entry(coin.id.clone()).or_insert(coin);
            }
            SessionEvent::CoinCollected(id) => {
                self.coins.remove(&id);
            }
            SessionEvent::RemoteDash(id) => {
                if let Some(remote) = self.remotes.get_mut(&id) {
                    remote.is_dashing = true;
                }
            }
            SessionEvent::RemoteHit { target, damage } => self.take_hit(&target, damage),
            SessionEvent::CellChanged(_) | SessionEvent::Error(_) => {}
        }
        None
    }

    /// Last live entity wins; otherwise the highest score, ties to the lowest id.
    fn finish_round(&self, prize_pool: f64) -> RoundResult {
        let everyone: Vec<&EntitySnapshot> =
            std::iter::once(&self.me).chain(self.remotes.values()).collect();
        let alive: Vec<&&EntitySnapshot> = everyone.iter().filter(|e| e.is_alive).collect();

        let winner = if alive.len() == 1 {
            Some(*alive[0])
        } else {
            everyone
                .iter()
                .copied()
                .max_by(|a, b| a.score.cmp(&b.score).then_with(|| b.id.cmp(&a.id)))
        };

        RoundResult {
            winner: winner.map(|w| w.id.clone()),
            winner_name: winner.map(|w| w.display_name.clone()),
            prize_pool,
        }
    }

    fn reset(&mut self) {
        for entity in std::iter::once(&mut self.me).chain(self.remotes.values_mut()) {
            entity.hp = MAX_HP;
            entity.is_alive = true;
            entity.score = 0;
        }
        self.coins.clear();
        self.struck.clear();
    }

    /// A fresh round sized for `participants` players.
    pub fn next_round(&self, participants: usize) -> TournamentState {
        TournamentState::new(
            self.settings.prize_per_player * participants.max(1) as f64,
            self.settings.round_secs,
            true,
        )
    }

    /// Rolls the per-second coin spawn. Only meaningful on the clock authority.
    pub fn roll_coin<R: Rng>(&self, rng: &mut R) -> Option<LocalEvent> {
        if !self.round_active() || self.coins.len() >= self.settings.max_coins {
            return None;
        }
        if !rng.gen_bool(self.settings.coin_spawn_chance.clamp(0.0, 1.0)) {
            return None;
        }
        let coin = Coin::new(
            format!("coin_{}", uuid::Uuid::new_v4().simple()),
            rng.gen_range(0.0..self.settings.world_width),
            rng.gen_range(0.0..self.settings.world_height),
        );
        Some(LocalEvent::CoinSpawn(coin))
    }
}

fn distance(me: &EntitySnapshot, x: f64, y: f64) -> f64 {
    (me.x - x).hypot(me.y - y)
}

/// Per-player totals collected when the bot stops.
#[derive(Debug, Clone)]
pub struct BotReport {
    pub id: EntityId,
    pub stats: SyncStats,
    pub coins_collected: u32,
    pub hits_landed: u32,
    pub rounds_seen: u32,
    pub rounds_won: u32,
}

/// A simulated participant driving its own session.
pub struct Bot {
    model: BotModel,
    handle: SessionHandle,
    snapshot: SharedSnapshot,
    events: UnboundedReceiver<SessionEvent>,
    rng: StdRng,
    reopen_at: Option<Instant>,
    rounds_seen: u32,
    rounds_won: u32,
}

impl Bot {
    /// Connects bot number `index` to `broker` and starts its position broadcast.
    pub async fn spawn(
        broker: &Arc<MemoryBroker>,
        sync: SyncConfig,
        settings: SimulationSettings,
        index: usize,
    ) -> Result<Self, SyncError> {
        let mut rng = StdRng::from_entropy();
        let me = EntitySnapshot::new(
            format!("bot_{index:03}"),
            format!("Bot {index}"),
            rng.gen_range(SPAWN_MARGIN..(settings.world_width - SPAWN_MARGIN).max(SPAWN_MARGIN + 1.0)),
            rng.gen_range(SPAWN_MARGIN..(settings.world_height - SPAWN_MARGIN).max(SPAWN_MARGIN + 1.0)),
            COLORS[index % COLORS.len()],
        );

        let snapshot = SharedSnapshot::new(Some(me.clone()));
        let (handler, events) = ChannelHandler::new();
        let handle = Session::connect(
            sync,
            Arc::new(broker.transport()),
            handler,
            snapshot.clone(),
            me.clone(),
        )
        .await?;
        handle.start_broadcast().await?;
        debug!("{} spawned at ({:.0}, {:.0})", me.id, me.x, me.y);

        let mut model = BotModel::new(me, settings);
        model.heading = rng.gen_range(0.0..TAU);

        Ok(Self {
            model,
            handle,
            snapshot,
            events,
            rng,
            reopen_at: None,
            rounds_seen: 0,
            rounds_won: 0,
        })
    }

    pub fn id(&self) -> &EntityId {
        self.handle.local_id()
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Publishes the start of a round for `participants` players.
    pub async fn open_round(&self, participants: usize) -> Result<(), SyncError> {
        let state = self.model.next_round(participants);
        info!(
            "{} opening a {}s round with prize pool {:.1}",
            self.id(),
            state.time_left_seconds,
            state.prize_pool
        );
        self.handle.publish(LocalEvent::TournamentState(state)).await
    }

    /// Runs the game loop until shutdown is initiated or the session closes,
    /// then disconnects.
    pub async fn run(mut self, shutdown: ShutdownState) -> BotReport {
        let frame_period = Duration::from_millis(self.model.settings.frame_ms);
        let mut frame = interval(frame_period);
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut economy = interval(Duration::from_secs(1));
        economy.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();

        while !shutdown.is_shutdown_initiated() && !self.handle.is_closed() {
            tokio::select! {
                _ = frame.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_frame).as_secs_f64().min(0.1);
                    last_frame = now;
                    self.on_frame(dt).await;
                }
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => break,
                },
                _ = economy.tick() => self.on_economy_tick().await,
            }
        }

        let stats = self.handle.stats().await.unwrap_or_default();
        if let Err(e) = self.handle.disconnect().await {
            warn!("{} failed to disconnect cleanly: {}", self.id(), e);
        }

        BotReport {
            id: self.id().clone(),
            stats,
            coins_collected: self.model.coins_collected(),
            hits_landed: self.model.hits_landed(),
            rounds_seen: self.rounds_seen,
            rounds_won: self.rounds_won,
        }
    }

    async fn on_frame(&mut self, dt: f64) {
        let events = self.model.step(dt, &mut self.rng);
        self.snapshot.set(self.model.me().clone());
        for event in events {
            self.publish(event).await;
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        if let SessionEvent::Error(e) = &event {
            warn!("{} session error: {}", self.id(), e);
        }
        if let Some(result) = self.model.apply(event) {
            self.rounds_seen += 1;
            if result.winner.as_ref() == Some(self.handle.local_id()) {
                self.rounds_won += 1;
                info!(
                    "{} won the round ({:.1} prize pool)",
                    self.id(),
                    result.prize_pool
                );
            }
            let intermission = Duration::from_secs(self.model.settings.intermission_secs);
            self.reopen_at = Some(Instant::now() + intermission);
            self.snapshot.set(self.model.me().clone());
        }
    }

    /// Once a second the clock authority spawns coins and reopens rounds.
    async fn on_economy_tick(&mut self) {
        let is_authority = match self.handle.round_state().await {
            Ok(status) => status.is_authority,
            Err(_) => return,
        };
        if !is_authority {
            return;
        }

        if let Some(at) = self.reopen_at {
            if Instant::now() >= at && !self.model.round_active() {
                self.reopen_at = None;
                if let Err(e) = self.open_round(self.model.member_count()).await {
                    warn!("{} could not reopen the round: {}", self.id(), e);
                }
                return;
            }
        }

        if let Some(event) = self.model.roll_coin(&mut self.rng) {
            self.publish(event).await;
        }
    }

    async fn publish(&self, event: LocalEvent) {
        let name = event.name();
        match self.handle.publish(event).await {
            Ok(()) => {}
            Err(SyncError::SessionClosed) => {}
            Err(e) => warn!("{} failed to publish {}: {}", self.id(), name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_settings() -> SimulationSettings {
        SimulationSettings {
            dash_chance: 0.0,
            ..SimulationSettings::default()
        }
    }

    fn model_at(x: f64, y: f64) -> BotModel {
        BotModel::new(
            EntitySnapshot::new("bot_000", "Bot 0", x, y, "#fff"),
            quiet_settings(),
        )
    }

    fn remote(id: &str, x: f64, y: f64) -> EntitySnapshot {
        EntitySnapshot::new(id, id.to_uppercase(), x, y, "#000")
    }

    fn start_round(model: &mut BotModel) {
        model.apply(SessionEvent::TournamentState(TournamentState::new(0.3, 120, true)));
    }

    #[test]
    fn test_movement_stays_inside_world() {
        let mut model = model_at(30.0, 30.0);
        let mut rng = StdRng::seed_from_u64(7);
        let settings = quiet_settings();

        for _ in 0..2_000 {
            model.step(0.05, &mut rng);
            let me = model.me();
            assert!(me.x >= settings.entity_size && me.x <= settings.world_width - settings.entity_size);
            assert!(me.y >= settings.entity_size && me.y <= settings.world_height - settings.entity_size);
        }
    }

    #[test]
    fn test_coins_collected_only_during_round() {
        let mut model = model_at(500.0, 500.0);
        let mut rng = StdRng::seed_from_u64(1);
        model.apply(SessionEvent::CoinSpawned(Coin::new("coin_a", 500.0, 500.0)));

        assert!(model.step(0.01, &mut rng).is_empty());
        assert_eq!(model.coin_count(), 1);

        start_round(&mut model);
        let events = model.step(0.01, &mut rng);

        assert_eq!(events, vec![LocalEvent::CoinCollect(CoinId::from("coin_a"))]);
        assert_eq!(model.me().score, 1);
        assert_eq!(model.coin_count(), 0);
        assert_eq!(model.coins_collected(), 1);
    }

    #[test]
    fn test_duplicate_spawn_and_remote_collect() {
        let mut model = model_at(500.0, 500.0);
        model.apply(SessionEvent::CoinSpawned(Coin::new("coin_a", 10.0, 10.0)));
        model.apply(SessionEvent::CoinSpawned(Coin::new("coin_a", 900.0, 900.0)));
        assert_eq!(model.coin_count(), 1);

        model.apply(SessionEvent::CoinCollected(CoinId::from("coin_a")));
        model.apply(SessionEvent::CoinCollected(CoinId::from("coin_a")));
        assert_eq!(model.coin_count(), 0);
    }

    #[test]
    fn test_dash_hits_each_target_once() {
        let mut model = model_at(500.0, 500.0);
        let mut rng = StdRng::seed_from_u64(3);
        start_round(&mut model);
        model.apply(SessionEvent::EntityJoined(remote("bot_001", 505.0, 500.0)));
        model.apply(SessionEvent::EntityJoined(remote("bot_002", 1500.0, 500.0)));

        assert_eq!(model.dash(), Some(LocalEvent::Dash));
        assert_eq!(model.dash(), None);

        let events = model.step(0.01, &mut rng);
        assert_eq!(
            events,
            vec![LocalEvent::Hit {
                target: EntityId::from("bot_001"),
                damage: 20
            }]
        );
        assert_eq!(model.remote(&EntityId::from("bot_001")).map(|r| r.hp), Some(80));

        assert!(model.step(0.01, &mut rng).is_empty());
        assert_eq!(model.hits_landed(), 1);
    }

    #[test]
    fn test_no_hits_outside_round() {
        let mut model = model_at(500.0, 500.0);
        let mut rng = StdRng::seed_from_u64(3);
        model.apply(SessionEvent::EntityJoined(remote("bot_001", 505.0, 500.0)));

        model.dash();
        assert!(model.step(0.01, &mut rng).is_empty());
    }

    #[test]
    fn test_lethal_remote_hit_stops_local_entity() {
        let mut model = model_at(500.0, 500.0);
        let mut rng = StdRng::seed_from_u64(5);
        start_round(&mut model);

        for _ in 0..5 {
            model.apply(SessionEvent::RemoteHit {
                target: EntityId::from("bot_000"),
                damage: 20,
            });
        }

        assert_eq!(model.me().hp, 0);
        assert!(!model.me().is_alive);
        let before = (model.me().x, model.me().y);
        assert!(model.step(0.5, &mut rng).is_empty());
        assert_eq!((model.me().x, model.me().y), before);
    }

    #[test]
    fn test_last_survivor_wins_and_round_resets() {
        let mut model = model_at(500.0, 500.0);
        start_round(&mut model);
        let mut champion = remote("bot_001", 0.0, 0.0);
        champion.score = 0;
        let mut fallen = remote("bot_002", 0.0, 0.0);
        fallen.score = 9;
        fallen.hp = 0;
        fallen.is_alive = false;
        model.apply(SessionEvent::EntityUpdated(champion));
        model.apply(SessionEvent::EntityUpdated(fallen));
        model.apply(SessionEvent::RemoteHit {
            target: EntityId::from("bot_000"),
            damage: 100,
        });

        let result = model
            .apply(SessionEvent::RoundEnded(TournamentState::new(0.3, 0, false)))
            .unwrap();

        assert_eq!(result.winner, Some(EntityId::from("bot_001")));
        assert_eq!(result.winner_name.as_deref(), Some("BOT_001"));
        assert!(!model.round_active());
        assert!(model.me().is_alive);
        assert_eq!(model.me().hp, MAX_HP);
        let fallen = model.remote(&EntityId::from("bot_002")).unwrap();
        assert!(fallen.is_alive);
        assert_eq!(fallen.score, 0);
    }

    #[test]
    fn test_top_score_wins_when_several_survive() {
        let mut model = model_at(500.0, 500.0);
        start_round(&mut model);
        let mut leader = remote("bot_002", 0.0, 0.0);
        leader.score = 4;
        model.apply(SessionEvent::EntityUpdated(remote("bot_001", 0.0, 0.0)));
        model.apply(SessionEvent::EntityUpdated(leader));

        let result = model
            .apply(SessionEvent::RoundEnded(TournamentState::new(0.3, 0, false)))
            .unwrap();
        assert_eq!(result.winner, Some(EntityId::from("bot_002")));
    }

    #[test]
    fn test_coin_roll_respects_cap_and_round() {
        let mut settings = quiet_settings();
        settings.coin_spawn_chance = 1.0;
        settings.max_coins = 1;
        let mut model = BotModel::new(EntitySnapshot::new("bot_000", "Bot 0", 1.0, 1.0, "#fff"), settings);
        let mut rng = StdRng::seed_from_u64(9);

        assert!(model.roll_coin(&mut rng).is_none());

        start_round(&mut model);
        let Some(LocalEvent::CoinSpawn(coin)) = model.roll_coin(&mut rng) else {
            panic!("expected a coin spawn");
        };
        assert!(coin.id.as_str().starts_with("coin_"));

        model.apply(SessionEvent::CoinSpawned(coin));
        assert!(model.roll_coin(&mut rng).is_none());
    }

    #[test]
    fn test_next_round_scales_prize_with_players() {
        let model = model_at(0.0, 0.0);
        let state = model.next_round(4);
        assert!((state.prize_pool - 0.4).abs() < 1e-9);
        assert_eq!(state.time_left_seconds, 120);
        assert!(state.round_active);
    }
}
