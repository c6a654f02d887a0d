//! Assertions over conversation state

use crate::core_store::model::{ConversationId, Message};
use crate::core_store::query::ConversationStore;
use crate::core_store::store::MessageLog;

/// Assert `seq` is 1..=n and `created_at` strictly increases
pub fn assert_log_ordered(messages: &[Message]) {
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.seq, i as u64 + 1, "gap in sequence at {:?}", message.id);
    }
    for pair in messages.windows(2) {
        if pair[1].created_at <= pair[0].created_at {
            panic!(
                "createdAt not strictly increasing: {} then {} ({:?})",
                pair[0].created_at, pair[1].created_at, pair[1].id
            );
        }
    }
}

/// Assert the store's incremental counter agrees with a full scan of the log
pub fn assert_unread_consistent(store: &ConversationStore, log: &MessageLog, conversation_id: &ConversationId) {
    let counted = store.unread_count(conversation_id).expect("conversation in store");
    let scanned = store.recount(log, conversation_id).expect("conversation in log");
    if counted != scanned {
        panic!(
            "Unread counter drifted for {}: stored {}, recounted {}",
            conversation_id, counted, scanned
        );
    }
}
