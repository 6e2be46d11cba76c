//! Statistics tracking for sync sessions.
use serde::{Deserialize, Serialize};

/// Counters maintained by the session loop.
///
/// Snapshots of these are returned by [`crate::SessionHandle::stats`]; the live
/// copy is only ever touched by the session that owns it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Position messages handed to the transport
    pub positions_published: u64,
    /// Global bus messages handed to the transport
    pub global_events_published: u64,
    /// Position and global deliveries passed on to the handler
    pub deliveries_routed: u64,
    /// Deliveries dropped because they could not be decoded or failed validation
    pub malformed_dropped: u64,
    /// Cell or setup topics whose subscribe call failed
    pub subscribe_failures: u64,
    /// Cell topics whose unsubscribe call failed
    pub unsubscribe_failures: u64,
    /// Completed moves to a different cell, the initial one included
    pub cell_transitions: u64,
    /// Latest presence member count
    pub member_count: usize,
}

impl SyncStats {
    /// Total messages this session handed to the transport.
    pub fn total_published(&self) -> u64 {
        self.positions_published + self.global_events_published
    }
}

/// Aggregate over many sessions, used by hosts that run several at once.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub sessions: usize,
    pub totals: SyncStats,
}

impl AggregateStats {
    pub fn add(&mut self, stats: &SyncStats) {
        self.sessions += 1;
        let totals = &mut self.totals;
        totals.positions_published += stats.positions_published;
        totals.global_events_published += stats.global_events_published;
        totals.deliveries_routed += stats.deliveries_routed;
        totals.malformed_dropped += stats.malformed_dropped;
        totals.subscribe_failures += stats.subscribe_failures;
        totals.unsubscribe_failures += stats.unsubscribe_failures;
        totals.cell_transitions += stats.cell_transitions;
        // Every session sees the same presence set; keep the largest view
        totals.member_count = totals.member_count.max(stats.member_count);
    }
}
