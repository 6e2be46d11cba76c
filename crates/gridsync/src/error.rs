//! Error types and handling for the sync layer.
//!
//! [`TransportError`] is what a substrate implementation reports. [`SyncError`]
//! is what the session surfaces to its caller and to the error-reporting
//! collaborator, classified the way the session reacts to it:
//!
//! * **TransportFailure** - fatal to the session, never retried here
//! * **SubscribeFailure** - one topic failed; logged and retried on a later transition
//! * **MalformedMessage** - dropped and counted; only reported for local publishes

use crate::cell::Topic;
use crate::events::EventError;

/// Failures reported by a [`crate::Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,

    #[error("Topic {topic} rejected: {reason}")]
    Rejected { topic: Topic, reason: String },
}

/// Errors surfaced by a session.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The transport never connected, or dropped the connection mid-session.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Subscribing to or unsubscribing from one topic failed.
    #[error("Subscription to {topic} failed: {source}")]
    SubscribeFailure {
        topic: Topic,
        #[source]
        source: TransportError,
    },

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] EventError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid local snapshot: {0}")]
    InvalidSnapshot(String),

    /// The session reached its terminal state.
    #[error("Session closed")]
    SessionClosed,
}

impl SyncError {
    /// Whether the session can keep running after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::SessionClosed)
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}
