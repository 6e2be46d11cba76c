//! Shutdown coordination between the host and its simulated players.
//!
//! The host flips the flag when the run ends; every player task notices on
//! its next frame, disconnects its session, and returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across player tasks.
#[derive(Debug, Clone, Default)]
pub struct ShutdownState {
    /// Set when players should stop and disconnect
    shutdown_initiated: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if players should stop.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("Shutdown initiated - players will disconnect");
        }
    }
}
