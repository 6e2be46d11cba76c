//! # Position Broadcaster
//!
//! Samples the local snapshot on a fixed interval, keeps the subscription set
//! aligned with the occupied cell, and publishes the snapshot to its cell topic
//! when it moved far enough since the last publish.

use crate::cell::Cell;
use crate::error::TransportError;
use crate::events::{EventError, Message};
use crate::handler::SnapshotSource;
use crate::subscription::{SubscriptionSet, TransitionReport};
use crate::transport::Transport;
use crate::types::{EntityId, EntitySnapshot};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Movement-delta filter.
///
/// Holds the last published snapshot, the only snapshot this crate keeps
/// between ticks.
#[derive(Debug, Clone)]
pub struct MovementGate {
    threshold: f64,
    last_published: Option<EntitySnapshot>,
}

impl MovementGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_published: None,
        }
    }

    /// True when nothing was published yet, or the snapshot moved strictly more
    /// than the threshold on either axis.
    pub fn should_publish(&self, snapshot: &EntitySnapshot) -> bool {
        match &self.last_published {
            None => true,
            Some(last) => {
                (snapshot.x - last.x).abs() > self.threshold
                    || (snapshot.y - last.y).abs() > self.threshold
            }
        }
    }

    pub fn record(&mut self, snapshot: EntitySnapshot) {
        self.last_published = Some(snapshot);
    }

    pub fn last_published(&self) -> Option<&EntitySnapshot> {
        self.last_published.as_ref()
    }

    pub fn reset(&mut self) {
        self.last_published = None;
    }
}

/// Result of one broadcaster tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// The source had no snapshot.
    Skipped,
    /// The snapshot failed validation and was not used.
    Invalid(EventError),
    /// Cell checked, movement below threshold.
    Held { transition: TransitionReport },
    /// Position handed to the transport.
    Published {
        cell: Cell,
        transition: TransitionReport,
    },
    /// The publish call failed. Not retried; the gate still advanced.
    PublishFailed {
        cell: Cell,
        transition: TransitionReport,
        error: TransportError,
    },
}

impl TickOutcome {
    pub fn transition(&self) -> Option<&TransitionReport> {
        match self {
            Self::Held { transition }
            | Self::Published { transition, .. }
            | Self::PublishFailed { transition, .. } => Some(transition),
            Self::Skipped | Self::Invalid(_) => None,
        }
    }
}

/// Periodic position publisher. Owned by the session loop.
#[derive(Debug)]
pub struct PositionBroadcaster {
    local_id: EntityId,
    period: Duration,
    cell_size: f64,
    gate: MovementGate,
    interval: Option<Interval>,
}

impl PositionBroadcaster {
    /// Positions are only published for `local_id`, the identity the
    /// transport stamps on every message from this session.
    pub fn new(local_id: EntityId, period: Duration, cell_size: f64, movement_threshold: f64) -> Self {
        Self {
            local_id,
            period,
            cell_size,
            gate: MovementGate::new(movement_threshold),
            interval: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Starts the interval. The first tick fires immediately.
    pub fn start(&mut self) {
        if self.interval.is_some() {
            return;
        }
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        debug!("Position broadcaster started ({:?})", self.period);
    }

    /// Cancels the interval. No tick fires after this returns.
    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            debug!("Position broadcaster stopped");
        }
    }

    /// Waits for the next tick; pends forever while stopped.
    pub async fn next_tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn gate(&self) -> &MovementGate {
        &self.gate
    }

    /// Runs one tick: sample, align subscriptions, maybe publish.
    pub async fn tick(
        &mut self,
        source: &dyn SnapshotSource,
        subscriptions: &mut SubscriptionSet,
        transport: &dyn Transport,
    ) -> TickOutcome {
        let Some(snapshot) = source.local_snapshot() else {
            return TickOutcome::Skipped;
        };
        if let Err(e) = snapshot.validate() {
            warn!("Skipping tick with invalid local snapshot: {}", e);
            return TickOutcome::Invalid(e);
        }
        if snapshot.id != self.local_id {
            warn!(
                "Skipping tick for snapshot {} on session {}",
                snapshot.id, self.local_id
            );
            return TickOutcome::Invalid(EventError::InvalidPayload(format!(
                "snapshot id {} does not match session identity {}",
                snapshot.id, self.local_id
            )));
        }

        let cell = Cell::of(snapshot.x, snapshot.y, self.cell_size);
        let transition = subscriptions.on_cell_might_have_changed(cell, transport).await;

        if !self.gate.should_publish(&snapshot) {
            return TickOutcome::Held { transition };
        }

        let message = match Message::position(&snapshot) {
            Ok(message) => message,
            Err(e) => return TickOutcome::Invalid(e),
        };
        self.gate.record(snapshot);

        match transport.publish(&cell.topic(), message).await {
            Ok(()) => TickOutcome::Published { cell, transition },
            Err(error) => {
                warn!(cell = %cell, "Position publish failed: {}", error);
                TickOutcome::PublishFailed {
                    cell,
                    transition,
                    error,
                }
            }
        }
    }
}
