/*
    Query subsystem - Per-viewer conversation lists
*/

pub mod conversation_store;
pub mod filter;

pub use conversation_store::{ConversationIter, ConversationStore, DEFAULT_PREVIEW_CHARS};
pub use filter::{ConversationView, ListFilter, SortKey};
