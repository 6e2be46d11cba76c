//! # gridsync
//!
//! Area-of-interest subscription management and event synchronization for
//! multiplayer worlds that share a publish/subscribe substrate.
//!
//! The world is partitioned into square cells. Each participant only listens to
//! the 3x3 block of cell topics around the cell it occupies, publishes its own
//! position to its current cell when it has moved far enough, and shares a
//! handful of world-wide topics with everyone for presence, round state,
//! combat, and economy events.
//!
//! ## Architecture
//!
//! - [`cell`] - cell math and topic naming
//! - [`subscription`] - the moving 9-topic subscription set
//! - [`broadcaster`] - throttled position publishing
//! - [`presence`] - join/leave tracking and member counts
//! - [`bus`] - the global event topic and its receive-side rules
//! - [`clock`] - the locally advanced, periodically re-anchored round clock
//! - [`session`] - the single task that owns all of the above
//! - [`transport`] - the substrate interface and an in-memory implementation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gridsync::{
//!     ChannelHandler, EntitySnapshot, LocalEvent, MemoryBroker, Session, SharedSnapshot,
//!     SyncConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), gridsync::SyncError> {
//! let broker = MemoryBroker::new();
//! let local = EntitySnapshot::new("player_1", "Alice", 120.0, 80.0, "#3b82f6");
//! let source = SharedSnapshot::new(Some(local.clone()));
//! let (handler, mut events) = ChannelHandler::new();
//!
//! let session = Session::connect(
//!     SyncConfig::default(),
//!     Arc::new(broker.transport()),
//!     handler,
//!     source.clone(),
//!     local,
//! )
//! .await?;
//!
//! session.start_broadcast().await?;
//! source.update(|s| s.x += 15.0);
//! session.publish(LocalEvent::Dash).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery Model
//!
//! Delivery is best-effort throughout. Position messages may be dropped or
//! reordered, publishes are never retried, and there is no ordering across
//! cells. Round state is last-write-wins.

pub mod broadcaster;
pub mod bus;
pub mod cell;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod presence;
pub mod session;
pub mod stats;
pub mod subscription;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

pub use cell::{Cell, Topic, GLOBAL_TOPIC, PRESENCE_TOPIC};
pub use config::SyncConfig;
pub use error::{SyncError, TransportError};
pub use events::{CombatEvent, EconomyEvent, EventError, GlobalEvent, LocalEvent, Message};
pub use handler::{
    ChannelHandler, NoopHandler, SessionEvent, SessionHandler, SharedSnapshot, SnapshotSource,
};
pub use session::{RoundStatus, Session, SessionHandle};
pub use stats::{AggregateStats, SyncStats};
pub use transport::{
    ConnectionState, Inbound, MemoryBroker, MemoryTransport, PresenceAction, PresenceMember,
    PublishRecord, Transport,
};
pub use types::{Coin, CoinId, EntityId, EntitySnapshot, TournamentState, MAX_HP};
