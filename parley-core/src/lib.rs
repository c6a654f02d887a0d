//! Parley: real-time conversation engine
//!
//! Ordered per-conversation message logs with delivery tracking, per-viewer
//! conversation lists, presence with self-expiring typing indicators, and a
//! fire-and-forget notification boundary.

pub mod config;
pub mod core_events;
pub mod core_presence;
pub mod core_store;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::Config;
pub use core_events::{CoreEvent, EventBroadcaster, NotificationDispatcher, NotificationSink, NotifyError};
pub use core_presence::{PresenceState, PresenceTracker, TYPING_TTL};
pub use engine::ChatEngine;
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
