/*
    observer.rs - Committed-state subscription for the message log

    Observers are called synchronously inside the conversation's critical
    section, after the change is committed, so per-conversation deltas arrive
    in commit order. Implementations must be quick and non-blocking: update
    counters or indices, never perform I/O.
*/

use crate::core_store::model::{Conversation, ConversationId, DeliveryState, Message, MessageId, UserId};

/// A committed change to the message log
#[derive(Debug, Clone, Copy)]
pub enum LogDelta<'a> {
    /// A conversation was created
    Opened(&'a Conversation),

    /// A message was committed. During observer attachment this is also used
    /// to replay existing messages, so `delivery_state` may already be past
    /// `Sent`.
    Appended(&'a Message),

    /// A message's delivery state moved forward
    StateChanged {
        conversation_id: &'a ConversationId,
        message_id: &'a MessageId,
        sender_id: &'a UserId,
        from: DeliveryState,
        to: DeliveryState,
    },
}

impl LogDelta<'_> {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            LogDelta::Opened(conversation) => &conversation.id,
            LogDelta::Appended(message) => &message.conversation_id,
            LogDelta::StateChanged { conversation_id, .. } => conversation_id,
        }
    }
}

/// Subscriber to committed log changes
pub trait LogObserver: Send + Sync {
    fn on_delta(&self, delta: LogDelta<'_>);
}
