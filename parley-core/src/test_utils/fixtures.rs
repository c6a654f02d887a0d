//! Test fixtures for creating common test objects

use crate::core_events::EventBroadcaster;
use crate::core_store::model::{ConversationId, Message, NewMessage, Timestamp, UserId};
use crate::core_store::query::ConversationStore;
use crate::core_store::store::{MessageLog, StoreResult};
use std::sync::Arc;

pub fn alice() -> UserId {
    UserId::new("alice".to_string())
}

pub fn bob() -> UserId {
    UserId::new("bob".to_string())
}

pub fn carol() -> UserId {
    UserId::new("carol".to_string())
}

/// Numbered user ids (`user-0`, `user-1`, ...)
pub fn user(n: usize) -> UserId {
    UserId::new(format!("user-{}", n))
}

/// Builder for messages with explicit, increasing timestamps
pub struct MessageScript {
    conversation_id: ConversationId,
    clock: u64,
    step: u64,
}

impl MessageScript {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self { conversation_id, clock: 0, step: 10 }
    }

    pub fn starting_at(mut self, millis: u64) -> Self {
        self.clock = millis;
        self
    }

    /// Next draft, stamped `step` ms after the previous one
    pub fn draft(&mut self, sender: UserId, body: impl Into<String>) -> NewMessage {
        self.clock += self.step;
        NewMessage::new(self.conversation_id.clone(), sender, body)
            .created_at(Timestamp::from_millis(self.clock))
    }

    /// Append the next draft to `log`
    pub fn send(&mut self, log: &MessageLog, sender: UserId, body: impl Into<String>) -> StoreResult<Message> {
        log.append(self.draft(sender, body))
    }
}

/// Message log with one alice/bob conversation and alice's store attached
pub struct TestConversation {
    pub events: EventBroadcaster,
    pub log: MessageLog,
    pub store: Arc<ConversationStore>,
    pub conversation_id: ConversationId,
    pub script: MessageScript,
}

impl TestConversation {
    pub fn new() -> Self {
        let events = EventBroadcaster::new();
        let log = MessageLog::new(events.clone());
        let store = Arc::new(ConversationStore::new(alice()));
        log.attach_observer(store.clone()).expect("attach store");
        let conversation_id = log
            .open_conversation(alice(), bob(), "test")
            .expect("open conversation")
            .id;
        let script = MessageScript::new(conversation_id.clone());
        Self { events, log, store, conversation_id, script }
    }

    pub fn send(&mut self, sender: UserId, body: &str) -> Message {
        self.script.send(&self.log, sender, body).expect("append")
    }

    pub fn unread(&self) -> u64 {
        self.store.unread_count(&self.conversation_id).expect("unread count")
    }
}

impl Default for TestConversation {
    fn default() -> Self {
        Self::new()
    }
}
