//! # Presence Tracker
//!
//! Joins the well-known presence topic and turns enter/leave notifications into
//! join/leave callbacks. The member count is never tallied locally: every enter
//! or leave starts a fresh query against the substrate. Queries run off the
//! session loop and are tagged with a generation, so only the answer to the
//! latest query is applied.

use crate::cell::Topic;
use crate::error::TransportError;
use crate::events::Payload;
use crate::transport::{PresenceAction, PresenceMember, Transport};
use crate::types::{EntityId, EntitySnapshot};
use tracing::{debug, info, warn};

/// What a presence notification means for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Joined(EntitySnapshot),
    Left(EntityId),
    /// Own enter/leave echoed back, or an enter whose payload did not decode.
    Ignored,
}

/// Presence state for one session.
#[derive(Debug)]
pub struct PresenceTracker {
    local_id: EntityId,
    topic: Topic,
    joined: bool,
    generation: u64,
    member_count: usize,
    members: Vec<EntityId>,
}

impl PresenceTracker {
    pub fn new(local_id: EntityId) -> Self {
        Self {
            local_id,
            topic: Topic::presence(),
            joined: false,
            generation: 0,
            member_count: 0,
            members: Vec::new(),
        }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Subscribes to the presence topic, enters with the local snapshot as
    /// payload, and takes the initial member list.
    pub async fn join(
        &mut self,
        transport: &dyn Transport,
        local: &EntitySnapshot,
    ) -> Result<(), TransportError> {
        transport.subscribe(&self.topic).await?;
        let data = local
            .to_data()
            .map_err(|e| TransportError::Rejected {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })?;
        transport.presence_enter(&self.topic, data).await?;
        self.joined = true;

        let members = transport.presence_members(&self.topic).await?;
        self.generation += 1;
        self.set_members(members);
        info!("Entered presence with {} member(s)", self.member_count);
        Ok(())
    }

    /// Interprets one enter/leave notification.
    ///
    /// The caller is expected to follow every notification with a count refresh
    /// via [`PresenceTracker::begin_refresh`].
    pub fn on_presence(&mut self, action: PresenceAction, member: &PresenceMember) -> PresenceChange {
        if member.client_id == self.local_id {
            return PresenceChange::Ignored;
        }
        match action {
            PresenceAction::Enter => match EntitySnapshot::from_data(&member.data) {
                Ok(snapshot) => {
                    debug!("{} entered presence", member.client_id);
                    PresenceChange::Joined(snapshot)
                }
                Err(e) => {
                    warn!("Presence payload from {} did not decode: {}", member.client_id, e);
                    PresenceChange::Ignored
                }
            },
            PresenceAction::Leave => {
                debug!("{} left presence", member.client_id);
                PresenceChange::Left(member.client_id.clone())
            }
        }
    }

    /// Starts a member-count query and returns the generation its answer must
    /// carry.
    pub fn begin_refresh(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Applies a member query answer. Returns the new count when `generation`
    /// is the latest one, `None` for a superseded answer.
    pub fn apply_refresh(&mut self, generation: u64, members: Vec<PresenceMember>) -> Option<usize> {
        if generation != self.generation {
            debug!(
                "Dropping presence answer {} (latest is {})",
                generation, self.generation
            );
            return None;
        }
        self.set_members(members);
        Some(self.member_count)
    }

    pub fn member_count(&self) -> usize {
        self.member_count
    }

    /// Member ids from the latest query, sorted.
    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    /// The member with the smallest id keeps the round clock for everyone.
    pub fn authority(&self) -> Option<&EntityId> {
        self.members.first()
    }

    pub fn is_authority(&self) -> bool {
        self.authority() == Some(&self.local_id)
    }

    pub async fn leave(&mut self, transport: &dyn Transport) -> Result<(), TransportError> {
        if !self.joined {
            return Ok(());
        }
        self.joined = false;
        transport.presence_leave(&self.topic).await
    }

    fn set_members(&mut self, members: Vec<PresenceMember>) {
        let mut ids: Vec<EntityId> = members.into_iter().map(|m| m.client_id).collect();
        ids.sort();
        ids.dedup();
        self.member_count = ids.len();
        self.members = ids;
    }
}
