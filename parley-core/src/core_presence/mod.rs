//! Presence subsystem
//!
//! Online/offline state and typing indicators. Runs on its own lock and
//! never touches the message log.

pub mod tracker;

pub use tracker::{PresenceState, PresenceTracker, TYPING_TTL};
