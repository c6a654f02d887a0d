/*
    conversation.rs - Conversation model

    A conversation is a thread between exactly two participants about one
    subject. The log owns the immutable header (`Conversation`); each viewer
    gets a `ConversationSnapshot` carrying their own pin/archive flags and
    unread counter.
*/

use super::message::Message;
use super::types::{ConversationId, MessageId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Immutable conversation header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participant_ids: [UserId; 2],
    pub subject: String,
    pub created_at: Timestamp,
}

impl Conversation {
    pub fn new(participants: [UserId; 2], subject: impl Into<String>, created_at: Timestamp) -> Self {
        Conversation {
            id: ConversationId::generate(),
            participant_ids: participants,
            subject: subject.into(),
            created_at,
        }
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participant_ids.iter().any(|p| p == user)
    }

    /// The other participant, if `user` is one of the pair
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        match &self.participant_ids {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    /// Lookup key for the unordered pair + subject
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.participant_ids[0], &self.participant_ids[1], &self.subject)
    }
}

/// Unordered participant pair plus subject; `(a, b)` and `(b, a)` collide
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    low: UserId,
    high: UserId,
    subject: String,
}

impl PairKey {
    pub fn new(a: &UserId, b: &UserId, subject: &str) -> Self {
        let (low, high) = if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        PairKey { low, high, subject: subject.to_string() }
    }
}

/// Summary of the newest message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub preview: String,
    pub created_at: Timestamp,
}

impl LastMessage {
    pub fn from_message(message: &Message, preview_chars: usize) -> Self {
        LastMessage {
            message_id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            preview: message.preview(preview_chars),
            created_at: message.created_at,
        }
    }
}

/// A viewer's view of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub participant_ids: [UserId; 2],
    pub subject: String,
    pub pinned: bool,
    pub archived: bool,
    pub unread_count: u64,
    pub last_message: Option<LastMessage>,
}
