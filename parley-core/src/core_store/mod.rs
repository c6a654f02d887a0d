/*
    core_store - Conversation state layer

    The authoritative state for conversations:
    - Data models (conversations, messages, delivery state)
    - Ordered per-conversation message log
    - Per-viewer conversation metadata and lists
    - Append-only journal for replay
*/

pub mod model;
pub mod query;
pub mod store;

// Re-export commonly used types
pub use model::{
    Attachment, Conversation, ConversationId, ConversationSnapshot, DeliveryState, Message, MessageId,
    NewMessage, Timestamp, Transition, UserId,
};
pub use query::{ConversationStore, ConversationView, ListFilter, SortKey};
pub use store::{MessageLog, StoreError, StoreResult};
