//! Notification dispatch boundary
//!
//! The dispatcher drains an event queue on its own task and hands each event
//! to an external [`NotificationSink`]. The sink owns every presentation
//! decision (mute settings, permission checks, sound). Whatever it does,
//! including failing or panicking, stays on this side of the boundary: the
//! error is logged, counted and dropped, and the message path never waits on it.

use crate::core_events::{CoreEvent, EventBroadcaster};
use crate::metrics::{self as core_metrics, NOTIFY_DELIVERED, NOTIFY_FAILED};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Errors a notification sink may report
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification permission denied: {0}")]
    PermissionDenied(String),

    #[error("Notification sink unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// External collaborator that presents notifications
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(&self, event: &CoreEvent) -> Result<(), NotifyError>;
}

/// Counters reported when the dispatcher finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Background task feeding events to a sink
pub struct NotificationDispatcher {
    handle: JoinHandle<DispatchStats>,
}

impl NotificationDispatcher {
    /// Subscribe to `events` and start dispatching on the current runtime
    pub fn spawn(events: &EventBroadcaster, sink: Arc<dyn NotificationSink>) -> Self {
        Self::from_receiver(events.subscribe(), sink)
    }

    /// Start dispatching from an existing event queue
    pub fn from_receiver(
        mut rx: mpsc::UnboundedReceiver<CoreEvent>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut stats = DispatchStats::default();

            while let Some(event) = rx.recv().await {
                let kind = event.kind();
                let sink = Arc::clone(&sink);

                // A separate task isolates sink panics from the dispatch loop
                let outcome = tokio::spawn(async move { sink.notify(&event).await }).await;

                match outcome {
                    Ok(Ok(())) => {
                        stats.delivered += 1;
                        core_metrics::record_counter(NOTIFY_DELIVERED, 1);
                        debug!(kind, "notification delivered");
                    }
                    Ok(Err(e)) => {
                        stats.failed += 1;
                        core_metrics::record_counter(NOTIFY_FAILED, 1);
                        warn!(kind, error = %e, "notification sink rejected event");
                    }
                    Err(e) => {
                        stats.failed += 1;
                        core_metrics::record_counter(NOTIFY_FAILED, 1);
                        error!(kind, error = %e, "notification sink panicked");
                    }
                }
            }

            stats
        });

        Self { handle }
    }

    /// Wait until the event source closes and return the final counters
    pub async fn join(self) -> DispatchStats {
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "notification dispatcher task failed");
                DispatchStats::default()
            }
        }
    }

    /// Stop dispatching immediately
    pub fn abort(&self) {
        self.handle.abort();
    }
}
