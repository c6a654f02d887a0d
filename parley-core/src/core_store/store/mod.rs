/*
    Store subsystem - Message log, delivery state and journal
*/

pub mod cursor;
pub mod errors;
pub mod journal;
pub mod message_log;
pub mod observer;

pub use cursor::{LogCursor, MessagePage};
pub use errors::*;
pub use journal::{read_journal, spawn_journal, Journal, JournalEntry, JournalRecord, JournalWriter};
pub use message_log::MessageLog;
pub use observer::{LogDelta, LogObserver};
