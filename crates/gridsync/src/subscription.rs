//! # Subscription Set Manager
//!
//! Owns the set of per-cell topics a session listens to. On every cell change the
//! required neighborhood is recomputed and diffed against what is live: topics
//! that fell out are unsubscribed, topics that came in are subscribed.
//!
//! After a transition the live set equals `neighborhood(current)` minus any topic
//! whose subscribe call failed. Failed topics are never tracked, so they are
//! picked up again either by the next transition that needs them or by an
//! in-place retry once `retry_backoff` has elapsed.

use crate::cell::{Cell, Topic};
use crate::error::TransportError;
use crate::transport::Transport;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What one call to [`SubscriptionSet::on_cell_might_have_changed`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionReport {
    pub from: Option<Cell>,
    pub to: Option<Cell>,
    pub subscribed: Vec<Topic>,
    pub unsubscribed: Vec<Topic>,
    pub subscribe_failures: Vec<(Topic, TransportError)>,
    pub unsubscribe_failures: Vec<(Topic, TransportError)>,
}

impl TransitionReport {
    /// True when the occupied cell actually changed.
    pub fn changed_cell(&self) -> bool {
        self.from != self.to
    }

    /// True when nothing was attempted at all.
    pub fn is_noop(&self) -> bool {
        !self.changed_cell()
            && self.subscribed.is_empty()
            && self.subscribe_failures.is_empty()
    }
}

/// Live per-cell subscriptions for one session.
#[derive(Debug)]
pub struct SubscriptionSet {
    current: Option<Cell>,
    live: HashSet<Topic>,
    retry_backoff: Duration,
    retry_after: Option<Instant>,
}

impl SubscriptionSet {
    pub fn new(retry_backoff: Duration) -> Self {
        Self {
            current: None,
            live: HashSet::new(),
            retry_backoff,
            retry_after: None,
        }
    }

    /// Cell the set was last transitioned to. `None` until the first transition.
    pub fn current_cell(&self) -> Option<Cell> {
        self.current
    }

    /// Live topics, sorted for stable output.
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.live.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_live(&self, topic: &Topic) -> bool {
        self.live.contains(topic)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether every topic of the current neighborhood is live.
    pub fn is_complete(&self) -> bool {
        match self.current {
            Some(cell) => cell.neighborhood_topics().iter().all(|t| self.live.contains(t)),
            None => false,
        }
    }

    /// Brings the live set in line with `neighborhood(cell)`.
    ///
    /// A call for the current cell is a no-op, unless some of its topics failed
    /// earlier and the retry backoff has elapsed, in which case only the missing
    /// topics are subscribed.
    pub async fn on_cell_might_have_changed(
        &mut self,
        cell: Cell,
        transport: &dyn Transport,
    ) -> TransitionReport {
        let mut report = TransitionReport {
            from: self.current,
            to: Some(cell),
            ..Default::default()
        };

        if self.current == Some(cell) {
            if self.is_complete() || !self.retry_due() {
                return report;
            }
            debug!(cell = %cell, "Retrying missing cell subscriptions");
        }

        let needed = cell.neighborhood_topics();
        let mut stale: Vec<Topic> = self.live.difference(&needed).cloned().collect();
        let mut missing: Vec<Topic> = needed.difference(&self.live).cloned().collect();
        stale.sort();
        missing.sort();

        // Removal and addition run side by side so a slow unsubscribe never
        // holds up the new neighborhood.
        let (removed, added) = tokio::join!(
            unsubscribe_all(transport, &stale),
            subscribe_all(transport, &missing)
        );

        for (topic, result) in removed {
            // Dropped from tracking either way; deliveries on it are ignored
            self.live.remove(&topic);
            match result {
                Ok(()) => report.unsubscribed.push(topic),
                Err(e) => {
                    warn!(topic = %topic, "Unsubscribe failed: {}", e);
                    report.unsubscribe_failures.push((topic, e));
                }
            }
        }

        for (topic, result) in added {
            match result {
                Ok(()) => {
                    self.live.insert(topic.clone());
                    report.subscribed.push(topic);
                }
                Err(e) => {
                    warn!(topic = %topic, "Subscribe failed: {}", e);
                    report.subscribe_failures.push((topic, e));
                }
            }
        }

        self.retry_after = if report.subscribe_failures.is_empty() {
            None
        } else {
            Some(Instant::now() + self.retry_backoff)
        };

        if report.changed_cell() {
            info!(
                from = ?self.current,
                cell = %cell,
                "Cell transition: +{} -{}",
                report.subscribed.len(),
                report.unsubscribed.len() + report.unsubscribe_failures.len()
            );
        }
        self.current = Some(cell);
        report
    }

    /// Unsubscribes every tracked topic and forgets the current cell.
    ///
    /// Returns the topics whose unsubscribe failed; they are dropped regardless.
    pub async fn clear(&mut self, transport: &dyn Transport) -> Vec<(Topic, TransportError)> {
        let topics = self.topics();
        let results = unsubscribe_all(transport, &topics).await;
        self.live.clear();
        self.current = None;
        self.retry_after = None;
        results
            .into_iter()
            .filter_map(|(topic, result)| result.err().map(|e| (topic, e)))
            .collect()
    }

    fn retry_due(&self) -> bool {
        self.retry_after.map_or(true, |at| Instant::now() >= at)
    }
}

async fn subscribe_all(
    transport: &dyn Transport,
    topics: &[Topic],
) -> Vec<(Topic, Result<(), TransportError>)> {
    let mut results = Vec::with_capacity(topics.len());
    for topic in topics {
        results.push((topic.clone(), transport.subscribe(topic).await));
    }
    results
}

async fn unsubscribe_all(
    transport: &dyn Transport,
    topics: &[Topic],
) -> Vec<(Topic, Result<(), TransportError>)> {
    let mut results = Vec::with_capacity(topics.len());
    for topic in topics {
        results.push((topic.clone(), transport.unsubscribe(topic).await));
    }
    results
}
