/*
    cursor.rs - Lazy reads over a conversation log

    A cursor captures the log length when it is created and yields messages
    one at a time, taking the conversation lock only for the copy of each
    element. Messages appended afterwards are not visible to it; a new `get`
    picks them up.
*/

use super::message_log::ConversationLog;
use crate::core_store::model::Message;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Finite, restartable iterator over `seq` in `(after, until]`
#[derive(Clone)]
pub struct LogCursor {
    log: Arc<Mutex<ConversationLog>>,
    after: u64,
    until: u64,
    position: u64,
}

impl LogCursor {
    pub(crate) fn new(log: Arc<Mutex<ConversationLog>>, after: u64, until: u64) -> Self {
        LogCursor { log, after, until, position: after }
    }

    /// `seq` of the last message yielded, or the starting point
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Messages still to be yielded
    pub fn remaining(&self) -> u64 {
        self.until - self.position
    }

    /// Rewind to the starting point
    pub fn restart(&mut self) {
        self.position = self.after;
    }
}

impl Iterator for LogCursor {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        if self.position >= self.until {
            return None;
        }
        let message = {
            let guard = self.log.lock().unwrap_or_else(PoisonError::into_inner);
            guard.messages.get(self.position as usize).cloned()
        };
        if message.is_some() {
            self.position += 1;
        }
        message
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for LogCursor {}

impl std::fmt::Debug for LogCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCursor")
            .field("after", &self.after)
            .field("until", &self.until)
            .field("position", &self.position)
            .finish()
    }
}

/// One bounded page of history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Pass back as `since_seq` to continue
    pub next_cursor: u64,
    pub has_more: bool,
}

impl MessagePage {
    pub(crate) fn collect(mut cursor: LogCursor, limit: usize) -> Self {
        let messages: Vec<Message> = cursor.by_ref().take(limit).collect();
        MessagePage {
            messages,
            next_cursor: cursor.position(),
            has_more: cursor.remaining() > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::core_store::model::{NewMessage, Timestamp};
    use crate::core_store::store::MessageLog;
    use crate::test_utils::{alice, bob};

    fn log_with(n: u64) -> (MessageLog, crate::core_store::model::ConversationId) {
        let log = MessageLog::default();
        let conv = log.open_conversation(alice(), bob(), "history").unwrap();
        for i in 1..=n {
            let draft = NewMessage::new(conv.id.clone(), alice(), format!("m{}", i))
                .created_at(Timestamp::from_millis(i * 10));
            log.append(draft).unwrap();
        }
        (log, conv.id)
    }

    #[test]
    fn test_get_since_seq() {
        let (log, id) = log_with(5);
        let seqs: Vec<u64> = log.get(&id, 2).unwrap().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);

        assert_eq!(log.get(&id, 5).unwrap().count(), 0);
        assert_eq!(log.get(&id, 99).unwrap().count(), 0);
    }

    #[test]
    fn test_cursor_is_restartable() {
        let (log, id) = log_with(3);
        let mut cursor = log.get(&id, 0).unwrap();

        assert_eq!(cursor.next().map(|m| m.seq), Some(1));
        assert_eq!(cursor.position(), 1);

        cursor.restart();
        let seqs: Vec<u64> = cursor.clone().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        // The clone did not advance the original
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_cursor_does_not_see_later_appends() {
        let (log, id) = log_with(2);
        let cursor = log.get(&id, 0).unwrap();

        let draft = NewMessage::new(id.clone(), bob(), "late").created_at(Timestamp::from_millis(1_000));
        log.append(draft).unwrap();

        assert_eq!(cursor.len(), 2);
        assert_eq!(log.get(&id, 0).unwrap().count(), 3);
    }

    #[test]
    fn test_page_walks_history() {
        let (log, id) = log_with(5);

        let first = log.page(&id, 0, 2).unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.next_cursor, 2);
        assert!(first.has_more);

        let last = log.page(&id, 4, 2).unwrap();
        assert_eq!(last.messages.len(), 1);
        assert_eq!(last.next_cursor, 5);
        assert!(!last.has_more);
    }
}

