/*
    conversation_store.rs - Per-viewer conversation metadata

    Maintains, for one owner, the pin/archive flags, unread counter and
    last-message summary of every conversation the owner takes part in.
    Everything is updated incrementally from message log deltas; the unread
    counter is never recomputed by scanning messages.

    Lists are lazy and weakly consistent: each step re-reads the ordered
    index from where the previous step stopped, so a conversation that moves
    while a list is being consumed can be skipped or seen twice.
*/

use super::filter::{ConversationView, ListFilter, SortKey};
use crate::core_store::model::{
    Conversation, ConversationId, ConversationSnapshot, DeliveryState, LastMessage, Timestamp, UserId,
};
use crate::core_store::store::errors::{handle_poison, StoreError, StoreResult};
use crate::core_store::store::{LogDelta, LogObserver, MessageLog};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

pub const DEFAULT_PREVIEW_CHARS: usize = 80;

/// Position of a conversation in the list order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ListKey {
    /// `false` sorts first
    unpinned: bool,
    recency: Reverse<Timestamp>,
    id: ConversationId,
}

struct Entry {
    conversation: Conversation,
    pinned: bool,
    archived: bool,
    unread: u64,
    last_message: Option<LastMessage>,
}

impl Entry {
    fn key(&self) -> ListKey {
        let recency = self
            .last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(self.conversation.created_at);
        ListKey { unpinned: !self.pinned, recency: Reverse(recency), id: self.conversation.id.clone() }
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            id: self.conversation.id.clone(),
            participant_ids: self.conversation.participant_ids.clone(),
            subject: self.conversation.subject.clone(),
            pinned: self.pinned,
            archived: self.archived,
            unread_count: self.unread,
            last_message: self.last_message.clone(),
        }
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<ConversationId, Entry>,
    order: BTreeSet<ListKey>,
    display_names: HashMap<UserId, String>,
    total_unread: u64,
}

impl StoreState {
    /// Apply `change` to an entry, keeping the ordered index in step
    fn update<R>(&mut self, id: &ConversationId, change: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        let entry = self.entries.get_mut(id)?;
        let before = entry.key();
        let result = change(entry);
        let after = entry.key();
        if before != after {
            self.order.remove(&before);
            self.order.insert(after);
        }
        Some(result)
    }

    fn matches(&self, entry: &Entry, owner: &UserId, filter: &ListFilter) -> bool {
        if !filter.admits(entry.pinned, entry.archived, entry.unread) {
            return false;
        }
        let counterpart = entry.conversation.counterpart(owner).map(|user| {
            self.display_names.get(user).map(String::as_str).unwrap_or(user.0.as_str())
        });
        filter.matches_text(std::iter::once(entry.conversation.subject.as_str()).chain(counterpart))
    }
}

/// Conversation metadata as seen by one owner
pub struct ConversationStore {
    owner: UserId,
    preview_chars: usize,
    state: RwLock<StoreState>,
}

impl ConversationStore {
    pub fn new(owner: UserId) -> Self {
        ConversationStore {
            owner,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Flip the pinned flag and return the updated snapshot
    pub fn toggle_pin(&self, conversation_id: &ConversationId) -> StoreResult<ConversationSnapshot> {
        let mut state = self.state.write().map_err(handle_poison)?;
        let snapshot = state
            .update(conversation_id, |entry| {
                entry.pinned = !entry.pinned;
                entry.snapshot()
            })
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))?;
        debug!(owner = %self.owner, %conversation_id, pinned = snapshot.pinned, "pin toggled");
        Ok(snapshot)
    }

    /// Flip the archived flag and return the updated snapshot
    pub fn toggle_archive(&self, conversation_id: &ConversationId) -> StoreResult<ConversationSnapshot> {
        let mut state = self.state.write().map_err(handle_poison)?;
        let snapshot = state
            .update(conversation_id, |entry| {
                entry.archived = !entry.archived;
                entry.snapshot()
            })
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))?;
        debug!(owner = %self.owner, %conversation_id, archived = snapshot.archived, "archive toggled");
        Ok(snapshot)
    }

    pub fn get(&self, conversation_id: &ConversationId) -> StoreResult<ConversationSnapshot> {
        let state = self.state.read().map_err(handle_poison)?;
        state
            .entries
            .get(conversation_id)
            .map(Entry::snapshot)
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))
    }

    /// O(1) unread counter
    pub fn unread_count(&self, conversation_id: &ConversationId) -> StoreResult<u64> {
        let state = self.state.read().map_err(handle_poison)?;
        state
            .entries
            .get(conversation_id)
            .map(|entry| entry.unread)
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))
    }

    /// Unread messages across every conversation, archived included
    pub fn total_unread(&self) -> StoreResult<u64> {
        Ok(self.state.read().map_err(handle_poison)?.total_unread)
    }

    /// Name used when matching list queries
    pub fn set_display_name(&self, user: UserId, name: impl Into<String>) -> StoreResult<()> {
        self.state.write().map_err(handle_poison)?.display_names.insert(user, name.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|state| state.entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy list of conversations passing `filter`, pinned first
    pub fn list(&self, filter: ListFilter, sort: SortKey) -> ConversationIter<'_> {
        ConversationIter { store: self, filter, sort, after: None, done: false }
    }

    /// Recompute the unread count by scanning the log. Audits only; the
    /// stored counter is left untouched.
    pub fn recount(&self, log: &MessageLog, conversation_id: &ConversationId) -> StoreResult<u64> {
        let unread = log
            .get(conversation_id, 0)?
            .filter(|message| message.is_unread_for(&self.owner))
            .count();
        Ok(unread as u64)
    }

    fn apply(&self, state: &mut StoreState, delta: LogDelta<'_>) {
        match delta {
            LogDelta::Opened(conversation) => {
                if !conversation.has_participant(&self.owner)
                    || state.entries.contains_key(&conversation.id)
                {
                    return;
                }
                let entry = Entry {
                    conversation: conversation.clone(),
                    pinned: false,
                    archived: false,
                    unread: 0,
                    last_message: None,
                };
                state.order.insert(entry.key());
                state.entries.insert(conversation.id.clone(), entry);
            }
            LogDelta::Appended(message) => {
                let unread = message.is_unread_for(&self.owner);
                let preview_chars = self.preview_chars;
                let updated = state.update(&message.conversation_id, |entry| {
                    if unread {
                        entry.unread += 1;
                    }
                    let newer = entry
                        .last_message
                        .as_ref()
                        .map_or(true, |last| message.created_at > last.created_at);
                    if newer {
                        entry.last_message = Some(LastMessage::from_message(message, preview_chars));
                    }
                });
                if updated.is_some() && unread {
                    state.total_unread += 1;
                }
            }
            LogDelta::StateChanged { conversation_id, sender_id, from, to, .. } => {
                let became_read = from != DeliveryState::Read && to == DeliveryState::Read;
                if !became_read || sender_id == &self.owner {
                    return;
                }
                if let Some(entry) = state.entries.get_mut(conversation_id) {
                    if entry.unread > 0 {
                        entry.unread -= 1;
                        state.total_unread = state.total_unread.saturating_sub(1);
                    }
                }
            }
        }
    }
}

impl LogObserver for ConversationStore {
    fn on_delta(&self, delta: LogDelta<'_>) {
        // Observers cannot fail
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        self.apply(&mut state, delta);
    }
}

/// Lazy conversation list; see [`ConversationStore::list`]
pub struct ConversationIter<'a> {
    store: &'a ConversationStore,
    filter: ListFilter,
    sort: SortKey,
    after: Option<ListKey>,
    done: bool,
}

impl ConversationIter<'_> {
    pub fn sort_key(&self) -> SortKey {
        self.sort
    }
}

impl Iterator for ConversationIter<'_> {
    type Item = ConversationSnapshot;

    fn next(&mut self) -> Option<ConversationSnapshot> {
        if self.done {
            return None;
        }
        let state = self.store.state.read().unwrap_or_else(PoisonError::into_inner);
        let lower = match self.after.take() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        for key in state.order.range((lower, Bound::Unbounded)) {
            if self.filter.view == ConversationView::Pinned && key.unpinned {
                break;
            }
            self.after = Some(key.clone());
            if let Some(entry) = state.entries.get(&key.id) {
                if state.matches(entry, &self.store.owner, &self.filter) {
                    return Some(entry.snapshot());
                }
            }
        }

        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::model::{MessageId, NewMessage};
    use crate::test_utils::{alice, bob, carol};
    use std::sync::Arc;

    struct Fixture {
        log: MessageLog,
        store: Arc<ConversationStore>,
        clock: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let log = MessageLog::default();
            let store = Arc::new(ConversationStore::new(alice()));
            log.attach_observer(store.clone()).unwrap();
            Fixture { log, store, clock: 0 }
        }

        fn open(&self, other: UserId, subject: &str) -> ConversationId {
            self.log.open_conversation(alice(), other, subject).unwrap().id
        }

        fn send(&mut self, conv: &ConversationId, from: UserId, body: &str) -> MessageId {
            self.clock += 10;
            let draft = NewMessage::new(conv.clone(), from, body).created_at(Timestamp::from_millis(self.clock));
            self.log.append(draft).unwrap().id
        }

        fn ids(&self, filter: ListFilter) -> Vec<ConversationId> {
            self.store.list(filter, SortKey::LastActivity).map(|s| s.id).collect()
        }
    }

    #[test]
    fn test_unread_counts_only_inbound() {
        let mut fx = Fixture::new();
        let conv = fx.open(bob(), "lunch");

        let a = fx.send(&conv, alice(), "A");
        let b = fx.send(&conv, bob(), "B");
        fx.send(&conv, alice(), "C");

        assert_eq!(fx.store.unread_count(&conv).unwrap(), 1);

        // Reading an outbound message does not touch the owner's counter
        fx.log.mark_read(&a).unwrap();
        assert_eq!(fx.store.unread_count(&conv).unwrap(), 1);

        fx.log.mark_delivered(&b).unwrap();
        assert_eq!(fx.store.unread_count(&conv).unwrap(), 1);
        fx.log.mark_read(&b).unwrap();
        fx.log.mark_read(&b).unwrap();
        assert_eq!(fx.store.unread_count(&conv).unwrap(), 0);
        assert_eq!(fx.store.total_unread().unwrap(), 0);
        assert_eq!(fx.store.recount(&fx.log, &conv).unwrap(), 0);
    }

    #[test]
    fn test_store_ignores_foreign_conversations() {
        let fx = Fixture::new();
        fx.log.open_conversation(bob(), carol(), "private").unwrap();
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_attach_replays_existing_state() {
        let log = MessageLog::default();
        let conv = log.open_conversation(bob(), alice(), "old").unwrap();
        let first = log
            .append(NewMessage::new(conv.id.clone(), bob(), "one").created_at(Timestamp::from_millis(1)))
            .unwrap();
        log.append(NewMessage::new(conv.id.clone(), bob(), "two").created_at(Timestamp::from_millis(2)))
            .unwrap();
        log.mark_read(&first.id).unwrap();

        let store = Arc::new(ConversationStore::new(alice()));
        log.attach_observer(store.clone()).unwrap();

        let snapshot = store.get(&conv.id).unwrap();
        assert_eq!(snapshot.unread_count, 1);
        assert_eq!(snapshot.last_message.map(|m| m.preview), Some("two".to_string()));
    }

    #[test]
    fn test_toggles_flip_one_flag() {
        let fx = Fixture::new();
        let conv = fx.open(bob(), "x");

        let pinned = fx.store.toggle_pin(&conv).unwrap();
        assert!(pinned.pinned);
        assert!(!pinned.archived);

        let archived = fx.store.toggle_archive(&conv).unwrap();
        assert!(archived.pinned);
        assert!(archived.archived);

        fx.store.toggle_pin(&conv).unwrap();
        let restored = fx.store.toggle_archive(&conv).unwrap();
        assert!(!restored.pinned);
        assert!(!restored.archived);
    }

    #[test]
    fn test_toggle_unknown_conversation() {
        let fx = Fixture::new();
        let missing = ConversationId::new("missing".to_string());
        assert_eq!(fx.store.toggle_pin(&missing).unwrap_err(), StoreError::UnknownConversation(missing));
    }

    #[test]
    fn test_list_order_pinned_then_recent() {
        let mut fx = Fixture::new();
        let c1 = fx.open(bob(), "one");
        let c2 = fx.open(carol(), "two");
        let c3 = fx.open(bob(), "three");

        fx.send(&c1, bob(), "oldest");
        fx.send(&c2, carol(), "middle");
        fx.send(&c3, bob(), "newest");
        assert_eq!(fx.ids(ListFilter::inbox()), vec![c3.clone(), c2.clone(), c1.clone()]);

        fx.store.toggle_pin(&c1).unwrap();
        assert_eq!(fx.ids(ListFilter::inbox()), vec![c1.clone(), c3.clone(), c2.clone()]);

        // New activity reorders within the unpinned group only
        fx.send(&c2, alice(), "bump");
        assert_eq!(fx.ids(ListFilter::inbox()), vec![c1.clone(), c2.clone(), c3.clone()]);
        assert_eq!(fx.ids(ListFilter::pinned()), vec![c1]);
    }

    #[test]
    fn test_ties_break_by_id() {
        let log = MessageLog::default();
        let store = Arc::new(ConversationStore::new(alice()));
        log.attach_observer(store.clone()).unwrap();

        let a = log.open_conversation(alice(), bob(), "a").unwrap();
        let b = log.open_conversation(alice(), carol(), "b").unwrap();
        for conv in [&a, &b] {
            log.append(NewMessage::new(conv.id.clone(), alice(), "same").created_at(Timestamp::from_millis(7)))
                .unwrap();
        }

        let mut expected = vec![a.id, b.id];
        expected.sort();
        let listed: Vec<_> = store.list(ListFilter::inbox(), SortKey::LastActivity).map(|s| s.id).collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_views_and_archive() {
        let mut fx = Fixture::new();
        let quiet = fx.open(bob(), "quiet");
        let busy = fx.open(carol(), "busy");
        fx.send(&busy, carol(), "ping");

        assert_eq!(fx.ids(ListFilter::unread()), vec![busy.clone()]);

        fx.store.toggle_archive(&busy).unwrap();
        assert_eq!(fx.ids(ListFilter::inbox()), vec![quiet.clone()]);
        assert_eq!(fx.ids(ListFilter::archived()), vec![busy.clone()]);
        assert!(fx.ids(ListFilter::unread()).is_empty());

        // New messages do not unarchive
        fx.send(&busy, carol(), "again");
        assert_eq!(fx.ids(ListFilter::archived()), vec![busy]);
    }

    #[test]
    fn test_text_filter_matches_name_or_subject() {
        let fx = Fixture::new();
        let with_bob = fx.open(bob(), "Quarterly report");
        let with_carol = fx.open(carol(), "lunch");
        fx.store.set_display_name(bob(), "Bob Marley").unwrap();

        assert_eq!(fx.ids(ListFilter::inbox().matching("marley")), vec![with_bob.clone()]);
        assert_eq!(fx.ids(ListFilter::inbox().matching("QUARTERLY")), vec![with_bob]);
        // Falls back to the user id without a display name
        assert_eq!(fx.ids(ListFilter::inbox().matching("carol")), vec![with_carol]);
        assert!(fx.ids(ListFilter::inbox().matching("nobody")).is_empty());
    }

    #[test]
    fn test_list_is_lazy() {
        let mut fx = Fixture::new();
        let c1 = fx.open(bob(), "one");
        let c2 = fx.open(carol(), "two");
        fx.send(&c1, bob(), "x");
        fx.send(&c2, carol(), "y");

        let mut list = fx.store.list(ListFilter::inbox(), SortKey::LastActivity);
        assert_eq!(list.next().map(|s| s.id), Some(c2));
        // Writes proceed while a list is in progress; c1 moves ahead of the
        // cursor and is not revisited
        fx.store.toggle_pin(&c1).unwrap();
        assert!(list.next().is_none());
    }
}
