/*
    errors.rs - Error types for the store subsystem

    Every structural error is returned synchronously to the caller and never
    retried inside the core.
*/

use crate::core_store::model::{ConversationId, DeliveryState, MessageId, Timestamp, UserId};
use std::sync::PoisonError;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// `created_at` was not strictly after the last committed message.
    /// The caller must resubmit with a corrected timestamp.
    #[error("Out of order append to {conversation_id}: {attempted} is not after {last}")]
    OutOfOrder { conversation_id: ConversationId, last: Timestamp, attempted: Timestamp },

    /// Backward delivery-state change; stored state is unchanged
    #[error("Invalid delivery transition for {message_id}: {from} -> {to}")]
    InvalidTransition { message_id: MessageId, from: DeliveryState, to: DeliveryState },

    #[error("Unknown conversation: {0}")]
    UnknownConversation(ConversationId),

    #[error("Unknown message: {0}")]
    UnknownMessage(MessageId),

    /// Reply target missing or from another conversation
    #[error("Invalid reply in {conversation_id}: {reply_to} is not an earlier message of this conversation")]
    InvalidReply { conversation_id: ConversationId, reply_to: MessageId },

    #[error("{user_id} is not a participant of {conversation_id}")]
    NotParticipant { conversation_id: ConversationId, user_id: UserId },

    #[error("Invalid participants: {0}")]
    InvalidParticipants(String),

    /// Journal I/O, encoding or corruption
    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Helper to convert poison errors into StoreError
pub(crate) fn handle_poison<T>(_err: PoisonError<T>) -> StoreError {
    StoreError::LockPoisoned("a thread panicked while holding the lock".to_string())
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Journal(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Journal(err.to_string())
    }
}
