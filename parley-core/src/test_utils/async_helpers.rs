//! Async test helpers
//!
//! Utilities for consuming event queues in tests.

use crate::core_events::CoreEvent;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "event stream closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Receive the next event or give up after `duration`
pub async fn recv_event(
    rx: &mut mpsc::UnboundedReceiver<CoreEvent>,
    duration: Duration,
) -> Result<CoreEvent, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Every event already queued, without waiting
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Event kinds, in order
pub fn event_kinds(events: &[CoreEvent]) -> Vec<&'static str> {
    events.iter().map(CoreEvent::kind).collect()
}
