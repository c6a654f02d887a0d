/*
    message.rs - Message model

    Represents a single committed message in a conversation.

    - id: assigned by the log on commit
    - body: immutable once committed
    - created_at: strictly increasing within a conversation
    - seq: 1-based position in the conversation log
    - delivery_state: the only field that changes after commit
    - reply_to: optional reference to an earlier message of the same conversation
    - attachments: metadata only (files live elsewhere)
*/

use super::delivery::DeliveryState;
use super::types::{ConversationId, MessageId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Attachment metadata (actual file stored by the application)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, size_bytes: u64) -> Self {
        Attachment {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }
}

/// A committed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: Timestamp,
    pub seq: u64,
    pub delivery_state: DeliveryState,
    #[serde(rename = "replyToMessageId", default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Whether `viewer` should count this message as unread
    pub fn is_unread_for(&self, viewer: &UserId) -> bool {
        &self.sender_id != viewer && self.delivery_state != DeliveryState::Read
    }

    /// First `max_chars` characters of the body, with an ellipsis when cut
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.body.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}…", head)
        } else {
            head
        }
    }
}

/// A message submitted for appending.
///
/// When `created_at` is `None` the log stamps the message itself; a
/// caller-supplied timestamp must be strictly after the conversation's last
/// committed message or the append is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: Option<Timestamp>,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn new(conversation_id: ConversationId, sender_id: UserId, body: impl Into<String>) -> Self {
        NewMessage {
            conversation_id,
            sender_id,
            body: body.into(),
            created_at: None,
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    pub fn created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(body: &str) -> Message {
        Message {
            id: MessageId::generate(),
            conversation_id: ConversationId::generate(),
            sender_id: UserId::new("alice".to_string()),
            body: body.to_string(),
            created_at: Timestamp::from_millis(10),
            seq: 1,
            delivery_state: DeliveryState::Sent,
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn test_unread_for_viewer() {
        let mut msg = sample("hi");
        let alice = UserId::new("alice".to_string());
        let bob = UserId::new("bob".to_string());

        assert!(!msg.is_unread_for(&alice));
        assert!(msg.is_unread_for(&bob));

        msg.delivery_state = DeliveryState::Delivered;
        assert!(msg.is_unread_for(&bob));

        msg.delivery_state = DeliveryState::Read;
        assert!(!msg.is_unread_for(&bob));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let msg = sample("héllo wörld");
        assert_eq!(msg.preview(5), "héllo…");
        assert_eq!(msg.preview(50), "héllo wörld");
    }

    #[test]
    fn test_new_message_builder() {
        let conv = ConversationId::generate();
        let reply = MessageId::generate();
        let draft = NewMessage::new(conv.clone(), UserId::new("bob".to_string()), "yo")
            .created_at(Timestamp::from_millis(5))
            .reply_to(reply.clone())
            .attachment(Attachment::new("cat.png", "image/png", 2048));

        assert_eq!(draft.conversation_id, conv);
        assert_eq!(draft.created_at, Some(Timestamp::from_millis(5)));
        assert_eq!(draft.reply_to, Some(reply));
        assert_eq!(draft.attachments.len(), 1);
        assert_eq!(draft.attachments[0].mime_type, "image/png");
    }

    #[test]
    fn test_fixture_field_layout() {
        let msg = sample("layout");
        let json = serde_json::to_value(&msg).unwrap();
        for field in ["id", "conversationId", "senderId", "body", "createdAt", "deliveryState"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["deliveryState"], "sent");
        assert!(json["replyToMessageId"].is_null());
    }
}
