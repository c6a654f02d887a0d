//! Core events
//!
//! Events emitted by the message log and the presence tracker for
//! consumption by the notification dispatcher and other subscribers.

use crate::core_store::model::{ConversationId, Message, Timestamp, UserId};
use serde::{Deserialize, Serialize};

pub mod broadcaster;
pub mod dispatcher;

pub use broadcaster::EventBroadcaster;
pub use dispatcher::{DispatchStats, NotificationDispatcher, NotificationSink, NotifyError};

/// Core event type
///
/// Each variant is emitted once per state transition and carries the
/// conversation, the users involved and when it happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CoreEvent {
    /// A message was committed; `recipient_id` is the other participant
    MessageReceived {
        conversation_id: ConversationId,
        sender_id: UserId,
        recipient_id: UserId,
        message: Message,
        at: Timestamp,
    },

    /// A user started typing (renewals do not re-emit)
    TypingStarted {
        conversation_id: ConversationId,
        user_id: UserId,
        at: Timestamp,
    },

    /// A typing flag expired or was cleared
    TypingExpired {
        conversation_id: ConversationId,
        user_id: UserId,
        at: Timestamp,
    },
}

impl CoreEvent {
    /// Get the conversation ID associated with this event
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            CoreEvent::MessageReceived { conversation_id, .. } => conversation_id,
            CoreEvent::TypingStarted { conversation_id, .. } => conversation_id,
            CoreEvent::TypingExpired { conversation_id, .. } => conversation_id,
        }
    }

    /// Users involved in the event
    pub fn user_ids(&self) -> Vec<&UserId> {
        match self {
            CoreEvent::MessageReceived { sender_id, recipient_id, .. } => vec![sender_id, recipient_id],
            CoreEvent::TypingStarted { user_id, .. } => vec![user_id],
            CoreEvent::TypingExpired { user_id, .. } => vec![user_id],
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            CoreEvent::MessageReceived { at, .. } => *at,
            CoreEvent::TypingStarted { at, .. } => *at,
            CoreEvent::TypingExpired { at, .. } => *at,
        }
    }

    /// Short name, used as a log/metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            CoreEvent::MessageReceived { .. } => "message_received",
            CoreEvent::TypingStarted { .. } => "typing_started",
            CoreEvent::TypingExpired { .. } => "typing_expired",
        }
    }
}
