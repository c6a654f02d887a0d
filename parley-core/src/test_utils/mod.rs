//! Test utilities and helpers for Parley
//!
//! Common fixtures, event helpers and assertions shared by unit and
//! integration tests.

pub mod assertions;
pub mod async_helpers;
pub mod fixtures;
pub mod sinks;

pub use assertions::*;
pub use async_helpers::*;
pub use fixtures::*;
pub use sinks::*;
