//! Event Broadcasting System
//!
//! Fans core events out to every subscriber without ever blocking the
//! emitter. Each subscriber gets its own unbounded queue, so a slow consumer
//! builds up backlog instead of losing events or stalling the message path.

use crate::core_events::CoreEvent;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Event broadcaster for core events
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<CoreEvent>>>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an event to all subscribers
    ///
    /// # Returns
    /// Number of active subscribers that received the event
    pub fn emit(&self, event: CoreEvent) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Closed receivers are pruned here rather than on drop
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    /// Emit multiple events in order
    pub fn emit_many(&self, events: Vec<CoreEvent>) {
        for event in events {
            let _ = self.emit(event);
        }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        rx
    }

    /// Get number of subscribers whose receiver is still open
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// Drop every subscriber queue so receivers observe end-of-stream
    pub fn close(&self) {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::model::{ConversationId, Timestamp, UserId};

    fn started(conv: &str) -> CoreEvent {
        CoreEvent::TypingStarted {
            conversation_id: ConversationId::new(conv.to_string()),
            user_id: UserId::new("alice".to_string()),
            at: Timestamp::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_broadcaster_creation() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.emit(started("c1"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.conversation_id().0, "c1");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let broadcaster = EventBroadcaster::new();
        let mut rx1 = broadcaster.subscribe();
        let mut rx2 = broadcaster.subscribe();

        let count = broadcaster.emit(started("c1"));
        assert_eq!(count, 2);

        assert_eq!(rx1.recv().await.unwrap(), started("c1"));
        assert_eq!(rx2.recv().await.unwrap(), started("c1"));
    }

    #[tokio::test]
    async fn test_slow_subscriber_keeps_every_event() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        let events: Vec<CoreEvent> = (0..1_000).map(|i| started(&format!("c{}", i))).collect();
        broadcaster.emit_many(events.clone());

        for expected in events {
            assert_eq!(rx.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.emit(started("c1")), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let broadcaster = EventBroadcaster::new();
        {
            let _rx = broadcaster.subscribe();
            assert_eq!(broadcaster.subscriber_count(), 1);
        }

        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.emit(started("c1")), 0);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.close();
        assert!(rx.recv().await.is_none());
    }
}
