//! Notification sinks for tests

use crate::core_events::{CoreEvent, NotificationSink, NotifyError};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Records every event it is handed; optionally rejects all of them
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<CoreEvent>>,
    reject: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records, then fails every event
    pub fn rejecting() -> Self {
        Self { received: Mutex::new(Vec::new()), reject: true }
    }

    pub fn received(&self) -> Vec<CoreEvent> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &CoreEvent) -> Result<(), NotifyError> {
        self.received.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
        if self.reject {
            return Err(NotifyError::PermissionDenied("notifications disabled".to_string()));
        }
        Ok(())
    }
}
