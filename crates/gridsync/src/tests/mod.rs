//! Scenario tests for whole sessions running over the in-memory broker
//!
//! - Subscription set invariants under movement and failures
//! - Position throttling and broadcaster cancellation
//! - Presence joins, leaves, and member counts
//! - Global bus routing and filtering
//! - Connection lifecycle and terminal states
//! - Round clock authority and resync

pub mod support;

mod broadcast_test;
mod subscription_test;
