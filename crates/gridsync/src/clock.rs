//! # Round Clock
//!
//! Every participant counts the round down on its own, so clocks drift apart.
//! The drift is bounded by anchoring: whichever state arrives last replaces the
//! local one wholesale, and the clock authority (see
//! [`crate::presence::PresenceTracker::authority`]) republishes its state on a
//! fixed interval while the round runs. [`RoundClock::since_sync`] reports how
//! long the local clock has been running on its own.

use crate::types::TournamentState;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Effect of an update on the round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockChange {
    Unchanged,
    /// At least one second elapsed.
    Ticked(TournamentState),
    /// The round went from active to inactive.
    Ended(TournamentState),
}

#[derive(Debug)]
pub struct RoundClock {
    state: Option<TournamentState>,
    anchored_at: Option<Instant>,
    tick: Duration,
    carry: Duration,
}

impl RoundClock {
    pub fn new(tick: Duration) -> Self {
        Self {
            state: None,
            anchored_at: None,
            tick,
            carry: Duration::ZERO,
        }
    }

    pub fn state(&self) -> Option<TournamentState> {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.map_or(false, |s| s.round_active)
    }

    /// Time since the clock was last re-anchored. `None` before any state.
    pub fn since_sync(&self) -> Option<Duration> {
        self.anchored_at.map(|at| at.elapsed())
    }

    /// Replaces the local state with `state` (last write wins).
    pub fn apply(&mut self, state: TournamentState) -> ClockChange {
        let was_active = self.is_active();
        self.state = Some(state);
        self.anchored_at = Some(Instant::now());
        self.carry = Duration::ZERO;

        if was_active && !state.round_active {
            info!("Round ended with prize pool {}", state.prize_pool);
            ClockChange::Ended(state)
        } else {
            ClockChange::Unchanged
        }
    }

    /// Advances the local countdown by one tick period.
    pub fn tick(&mut self) -> ClockChange {
        let Some(state) = self.state.as_mut() else {
            return ClockChange::Unchanged;
        };
        if !state.round_active {
            return ClockChange::Unchanged;
        }

        self.carry += self.tick;
        let whole = self.carry.as_secs();
        if whole == 0 {
            return ClockChange::Unchanged;
        }
        self.carry -= Duration::from_secs(whole);

        let elapsed = u32::try_from(whole).unwrap_or(u32::MAX);
        state.time_left_seconds = state.time_left_seconds.saturating_sub(elapsed);
        if state.time_left_seconds == 0 {
            state.round_active = false;
            debug!("Local round clock reached zero");
            return ClockChange::Ended(*state);
        }
        ClockChange::Ticked(*state)
    }

    pub fn reset(&mut self) {
        self.state = None;
        self.anchored_at = None;
        self.carry = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_count_down_and_end() {
        let mut clock = RoundClock::new(Duration::from_secs(1));
        assert_eq!(clock.tick(), ClockChange::Unchanged);

        clock.apply(TournamentState::new(0.3, 2, true));
        assert_eq!(
            clock.tick(),
            ClockChange::Ticked(TournamentState::new(0.3, 1, true))
        );
        assert_eq!(
            clock.tick(),
            ClockChange::Ended(TournamentState::new(0.3, 0, false))
        );
        assert_eq!(clock.tick(), ClockChange::Unchanged);
        assert!(!clock.is_active());
    }

    #[test]
    fn test_sub_second_ticks_accumulate() {
        let mut clock = RoundClock::new(Duration::from_millis(250));
        clock.apply(TournamentState::new(0.0, 10, true));

        for _ in 0..3 {
            assert_eq!(clock.tick(), ClockChange::Unchanged);
        }
        assert_eq!(
            clock.tick(),
            ClockChange::Ticked(TournamentState::new(0.0, 9, true))
        );
    }

    #[test]
    fn test_last_write_wins() {
        let mut clock = RoundClock::new(Duration::from_secs(1));
        clock.apply(TournamentState::new(0.1, 100, true));
        clock.tick();
        clock.apply(TournamentState::new(0.5, 110, true));
        assert_eq!(clock.state(), Some(TournamentState::new(0.5, 110, true)));

        assert!(matches!(
            clock.apply(TournamentState::new(0.5, 0, false)),
            ClockChange::Ended(_)
        ));
        // Already inactive, a repeated final state does not end it twice
        assert_eq!(
            clock.apply(TournamentState::new(0.5, 0, false)),
            ClockChange::Unchanged
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_since_sync_tracks_anchor_age() {
        let mut clock = RoundClock::new(Duration::from_secs(1));
        assert_eq!(clock.since_sync(), None);

        clock.apply(TournamentState::new(0.0, 60, true));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(clock.since_sync(), Some(Duration::from_secs(3)));

        clock.apply(TournamentState::new(0.0, 57, true));
        assert_eq!(clock.since_sync(), Some(Duration::ZERO));
    }
}
