/*
    message_log.rs - Per-conversation ordered, append-only message log

    Owns message ordering and delivery-state mutation.

    Concurrency:
    - one mutex per conversation; appends and acknowledgements for the same
      conversation are serialized, different conversations run in parallel
    - lookup maps are sharded (DashMap) so they never become a global lock
    - critical sections only validate and commit; journal writes and event
      fan-out are queued without blocking

    Lock order is always `observers` (read or write) before a conversation
    mutex. Attaching an observer takes the write side and therefore sees a
    quiescent log while replaying existing state.
*/

use super::cursor::{LogCursor, MessagePage};
use super::errors::{handle_poison, StoreError, StoreResult};
use super::journal::{JournalRecord, JournalWriter};
use super::observer::{LogDelta, LogObserver};
use crate::core_events::{CoreEvent, EventBroadcaster};
use crate::core_store::model::{
    Conversation, ConversationId, DeliveryState, DeliveryStateMachine, Message, MessageId,
    NewMessage, PairKey, Timestamp, Transition, UserId,
};
use crate::metrics::{self as core_metrics, Timer};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Committed state of a single conversation
pub(crate) struct ConversationLog {
    pub(crate) conversation: Conversation,
    /// `messages[i].seq == i + 1`
    pub(crate) messages: Vec<Message>,
}

impl ConversationLog {
    fn new(conversation: Conversation) -> Self {
        ConversationLog { conversation, messages: Vec::new() }
    }

    pub(crate) fn len(&self) -> u64 {
        self.messages.len() as u64
    }

    fn last_created_at(&self) -> Option<Timestamp> {
        self.messages.last().map(|m| m.created_at)
    }
}

/// How a delivery-state request is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionMode {
    /// Receipts: stale or repeated requests are no-ops
    Acknowledge,
    /// Explicit requests: backward targets are rejected
    Explicit,
}

/// Ordered message log for all conversations
pub struct MessageLog {
    headers: DashMap<ConversationId, Conversation>,
    logs: DashMap<ConversationId, Arc<Mutex<ConversationLog>>>,
    pairs: DashMap<PairKey, ConversationId>,
    message_index: DashMap<MessageId, (ConversationId, u64)>,
    observers: RwLock<Vec<Arc<dyn LogObserver>>>,
    events: EventBroadcaster,
    journal: Option<JournalWriter>,
}

impl MessageLog {
    pub fn new(events: EventBroadcaster) -> Self {
        MessageLog {
            headers: DashMap::new(),
            logs: DashMap::new(),
            pairs: DashMap::new(),
            message_index: DashMap::new(),
            observers: RwLock::new(Vec::new()),
            events,
            journal: None,
        }
    }

    /// Queue every committed change to `journal`
    pub fn with_journal(mut self, journal: JournalWriter) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Return the conversation for the unordered pair and subject, creating
    /// it on first use
    pub fn open_conversation(
        &self,
        a: UserId,
        b: UserId,
        subject: impl Into<String>,
    ) -> StoreResult<Conversation> {
        if a == b {
            return Err(StoreError::InvalidParticipants(format!(
                "a conversation needs two distinct users, got {} twice",
                a
            )));
        }

        let subject = subject.into();
        let key = PairKey::new(&a, &b, &subject);

        let existing = self.pairs.get(&key).map(|id| id.value().clone());
        if let Some(id) = existing {
            return self.conversation(&id);
        }

        let observers = self.observers.read().map_err(handle_poison)?;
        match self.pairs.entry(key) {
            Entry::Occupied(entry) => {
                let id = entry.get().clone();
                drop(entry);
                self.conversation(&id)
            }
            Entry::Vacant(entry) => {
                // The pair stays locked until the conversation is fully installed
                let conversation = Conversation::new([a, b], subject, Timestamp::now());
                self.install(conversation.clone(), &observers, self.journal.as_ref());
                entry.insert(conversation.id.clone());

                core_metrics::record_counter(core_metrics::CONVERSATIONS_OPENED, 1);
                info!(
                    conversation_id = %conversation.id,
                    subject = %conversation.subject,
                    "conversation opened"
                );
                Ok(conversation)
            }
        }
    }

    /// Commit a message.
    ///
    /// Validation happens entirely before anything is written: a rejected
    /// append leaves no trace.
    pub fn append(&self, draft: NewMessage) -> StoreResult<Message> {
        let log = self.conversation_log(&draft.conversation_id)?;
        let observers = self.observers.read().map_err(handle_poison)?;
        let timer = Timer::new(core_metrics::APPEND_DURATION_MS);
        let mut guard = log.lock().map_err(handle_poison)?;

        let recipient = match guard.conversation.counterpart(&draft.sender_id) {
            Some(recipient) => recipient.clone(),
            None => {
                core_metrics::record_counter(core_metrics::APPENDS_REJECTED, 1);
                return Err(StoreError::NotParticipant {
                    conversation_id: draft.conversation_id,
                    user_id: draft.sender_id,
                });
            }
        };

        if let Some(reply_to) = &draft.reply_to {
            // Anything already indexed in this conversation is earlier than
            // the message being appended
            let reply_conversation = self.message_index.get(reply_to).map(|r| r.value().0.clone());
            if reply_conversation.as_ref() != Some(&draft.conversation_id) {
                core_metrics::record_counter(core_metrics::APPENDS_REJECTED, 1);
                return Err(StoreError::InvalidReply {
                    conversation_id: draft.conversation_id,
                    reply_to: reply_to.clone(),
                });
            }
        }

        let last = guard.last_created_at();
        let created_at = match (draft.created_at, last) {
            (Some(requested), _) => requested,
            (None, Some(last)) => Timestamp::now().max(last.next()),
            (None, None) => Timestamp::now(),
        };
        if let Some(last) = last {
            if created_at <= last {
                core_metrics::record_counter(core_metrics::APPENDS_OUT_OF_ORDER, 1);
                warn!(
                    conversation_id = %draft.conversation_id,
                    %last,
                    attempted = %created_at,
                    "rejected out-of-order append"
                );
                return Err(StoreError::OutOfOrder {
                    conversation_id: draft.conversation_id,
                    last,
                    attempted: created_at,
                });
            }
        }

        let seq = guard.len() + 1;
        let message = Message {
            id: MessageId::generate(),
            conversation_id: draft.conversation_id,
            sender_id: draft.sender_id,
            body: draft.body,
            created_at,
            seq,
            delivery_state: DeliveryState::Sent,
            reply_to: draft.reply_to,
            attachments: draft.attachments,
        };

        self.message_index
            .insert(message.id.clone(), (message.conversation_id.clone(), seq));
        guard.messages.push(message.clone());

        for observer in observers.iter() {
            observer.on_delta(LogDelta::Appended(&message));
        }
        if let Some(journal) = &self.journal {
            journal.record(JournalRecord::Appended(message.clone()));
        }
        self.events.emit(CoreEvent::MessageReceived {
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            recipient_id: recipient,
            message: message.clone(),
            at: created_at,
        });

        drop(guard);
        timer.stop();
        core_metrics::record_counter(core_metrics::MESSAGES_APPENDED, 1);
        debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            seq,
            "message appended"
        );

        Ok(message)
    }

    /// Lazy, finite, restartable sequence of messages with `seq > since_seq`.
    ///
    /// The sequence ends at the last message committed when it was created.
    pub fn get(&self, conversation_id: &ConversationId, since_seq: u64) -> StoreResult<LogCursor> {
        let log = self.conversation_log(conversation_id)?;
        let len = log.lock().map_err(handle_poison)?.len();
        Ok(LogCursor::new(log, since_seq.min(len), len))
    }

    /// At most `limit` messages after `since_seq`, plus the cursor to resume from
    pub fn page(
        &self,
        conversation_id: &ConversationId,
        since_seq: u64,
        limit: usize,
    ) -> StoreResult<MessagePage> {
        Ok(MessagePage::collect(self.get(conversation_id, since_seq)?, limit))
    }

    /// Receiver acknowledged receipt; stale or repeated calls are no-ops
    pub fn mark_delivered(&self, message_id: &MessageId) -> StoreResult<Transition> {
        self.apply_transition(message_id, DeliveryState::Delivered, TransitionMode::Acknowledge)
    }

    /// Receiver saw the message; a `sent` message jumps straight to `read`
    pub fn mark_read(&self, message_id: &MessageId) -> StoreResult<Transition> {
        self.apply_transition(message_id, DeliveryState::Read, TransitionMode::Acknowledge)
    }

    /// Explicit transition request; backward targets fail with `InvalidTransition`
    pub fn set_delivery_state(
        &self,
        message_id: &MessageId,
        target: DeliveryState,
    ) -> StoreResult<Transition> {
        self.apply_transition(message_id, target, TransitionMode::Explicit)
    }

    /// Current copy of a committed message
    pub fn message(&self, message_id: &MessageId) -> StoreResult<Message> {
        let (conversation_id, seq) = self.locate(message_id)?;
        let log = self.conversation_log(&conversation_id)?;
        let guard = log.lock().map_err(handle_poison)?;
        guard
            .messages
            .get(seq as usize - 1)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMessage(message_id.clone()))
    }

    pub fn conversation(&self, conversation_id: &ConversationId) -> StoreResult<Conversation> {
        self.headers
            .get(conversation_id)
            .map(|c| c.value().clone())
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))
    }

    /// Headers of every conversation, in no particular order
    pub fn conversations(&self) -> Vec<Conversation> {
        self.headers.iter().map(|c| c.value().clone()).collect()
    }

    /// Sequence number of the newest message (0 when empty)
    pub fn last_seq(&self, conversation_id: &ConversationId) -> StoreResult<u64> {
        let log = self.conversation_log(conversation_id)?;
        let len = log.lock().map_err(handle_poison)?.len();
        Ok(len)
    }

    /// Subscribe to committed changes.
    ///
    /// Existing conversations and messages are replayed to the observer
    /// first, with no commit able to interleave.
    pub fn attach_observer(&self, observer: Arc<dyn LogObserver>) -> StoreResult<()> {
        let mut observers = self.observers.write().map_err(handle_poison)?;

        let logs: Vec<_> = self.logs.iter().map(|entry| Arc::clone(entry.value())).collect();
        for log in logs {
            let guard = log.lock().map_err(handle_poison)?;
            observer.on_delta(LogDelta::Opened(&guard.conversation));
            for message in &guard.messages {
                observer.on_delta(LogDelta::Appended(message));
            }
        }

        observers.push(observer);
        Ok(())
    }

    /// Rebuild state from journal records.
    ///
    /// Records are validated like live operations but produce no events and
    /// are not journaled again. Returns the number of records applied.
    pub fn restore<I>(&self, records: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = JournalRecord>,
    {
        let observers = self.observers.read().map_err(handle_poison)?;
        let mut applied = 0;

        for record in records {
            match record {
                JournalRecord::Opened(conversation) => {
                    if self.headers.contains_key(&conversation.id) {
                        return Err(StoreError::Journal(format!(
                            "conversation {} opened twice",
                            conversation.id
                        )));
                    }
                    let key = conversation.pair_key();
                    let id = conversation.id.clone();
                    self.install(conversation, &observers, None);
                    self.pairs.insert(key, id);
                }
                JournalRecord::Appended(message) => {
                    let log = self.conversation_log(&message.conversation_id)?;
                    let mut guard = log.lock().map_err(handle_poison)?;
                    let in_order = guard.last_created_at().map_or(true, |last| message.created_at > last);
                    if message.seq != guard.len() + 1 || !in_order {
                        return Err(StoreError::Journal(format!(
                            "message {} out of sequence in {}",
                            message.id, message.conversation_id
                        )));
                    }
                    self.message_index
                        .insert(message.id.clone(), (message.conversation_id.clone(), message.seq));
                    guard.messages.push(message);
                    if let Some(committed) = guard.messages.last() {
                        for observer in observers.iter() {
                            observer.on_delta(LogDelta::Appended(committed));
                        }
                    }
                }
                JournalRecord::StateChanged { message_id, state, .. } => {
                    let (conversation_id, seq) = self.locate(&message_id)?;
                    let log = self.conversation_log(&conversation_id)?;
                    let mut guard = log.lock().map_err(handle_poison)?;
                    let message = guard
                        .messages
                        .get_mut(seq as usize - 1)
                        .ok_or_else(|| StoreError::UnknownMessage(message_id.clone()))?;
                    let transition = DeliveryStateMachine::request(message.delivery_state, state)
                        .map_err(|e| StoreError::Journal(e.to_string()))?;
                    if let Transition::Advanced { from, to } = transition {
                        message.delivery_state = to;
                        for observer in observers.iter() {
                            observer.on_delta(LogDelta::StateChanged {
                                conversation_id: &message.conversation_id,
                                message_id: &message.id,
                                sender_id: &message.sender_id,
                                from,
                                to,
                            });
                        }
                    }
                }
            }
            applied += 1;
        }

        info!(records = applied, "message log restored");
        Ok(applied)
    }

    fn apply_transition(
        &self,
        message_id: &MessageId,
        target: DeliveryState,
        mode: TransitionMode,
    ) -> StoreResult<Transition> {
        let (conversation_id, seq) = self.locate(message_id)?;
        let log = self.conversation_log(&conversation_id)?;
        let observers = self.observers.read().map_err(handle_poison)?;
        let mut guard = log.lock().map_err(handle_poison)?;

        let message = guard
            .messages
            .get_mut(seq as usize - 1)
            .ok_or_else(|| StoreError::UnknownMessage(message_id.clone()))?;

        let transition = match mode {
            TransitionMode::Acknowledge => {
                DeliveryStateMachine::acknowledge(message.delivery_state, target)
            }
            TransitionMode::Explicit => {
                DeliveryStateMachine::request(message.delivery_state, target).map_err(|e| {
                    core_metrics::record_counter(core_metrics::DELIVERY_REJECTED, 1);
                    StoreError::InvalidTransition {
                        message_id: message_id.clone(),
                        from: e.from,
                        to: e.to,
                    }
                })?
            }
        };

        if let Transition::Advanced { from, to } = transition {
            message.delivery_state = to;

            for observer in observers.iter() {
                observer.on_delta(LogDelta::StateChanged {
                    conversation_id: &message.conversation_id,
                    message_id: &message.id,
                    sender_id: &message.sender_id,
                    from,
                    to,
                });
            }
            if let Some(journal) = &self.journal {
                journal.record(JournalRecord::StateChanged {
                    conversation_id: message.conversation_id.clone(),
                    message_id: message.id.clone(),
                    state: to,
                });
            }
            core_metrics::record_counter(core_metrics::DELIVERY_TRANSITIONS, 1);
            debug!(message_id = %message.id, %from, %to, "delivery state advanced");
        }

        Ok(transition)
    }

    /// Register a new conversation. The conversation mutex is held while
    /// observers and the journal learn about it, so no append can overtake
    /// the `Opened` delta or record.
    fn install(
        &self,
        conversation: Conversation,
        observers: &[Arc<dyn LogObserver>],
        journal: Option<&JournalWriter>,
    ) {
        let id = conversation.id.clone();
        let log = Arc::new(Mutex::new(ConversationLog::new(conversation.clone())));
        let guard = log.lock().unwrap_or_else(PoisonError::into_inner);

        self.headers.insert(id.clone(), conversation);
        self.logs.insert(id, Arc::clone(&log));

        for observer in observers {
            observer.on_delta(LogDelta::Opened(&guard.conversation));
        }
        if let Some(journal) = journal {
            journal.record(JournalRecord::Opened(guard.conversation.clone()));
        }
    }

    fn locate(&self, message_id: &MessageId) -> StoreResult<(ConversationId, u64)> {
        self.message_index
            .get(message_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::UnknownMessage(message_id.clone()))
    }

    fn conversation_log(
        &self,
        conversation_id: &ConversationId,
    ) -> StoreResult<Arc<Mutex<ConversationLog>>> {
        self.logs
            .get(conversation_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::UnknownConversation(conversation_id.clone()))
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(EventBroadcaster::new())
    }
}
