//! Chat engine
//!
//! Facade over the message log, per-viewer conversation stores and the
//! presence tracker. Every operation a client can perform goes through here;
//! nothing in the engine fabricates messages on its own.

use crate::config::{Config, EngineConfig};
use crate::core_events::{CoreEvent, EventBroadcaster, NotificationDispatcher, NotificationSink};
use crate::core_presence::{PresenceState, PresenceTracker};
use crate::core_store::model::{
    Conversation, ConversationId, ConversationSnapshot, Message, MessageId, NewMessage, Transition, UserId,
};
use crate::core_store::query::ConversationStore;
use crate::core_store::store::{
    read_journal, spawn_journal, Journal, LogCursor, MessageLog, MessagePage, StoreError, StoreResult,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct ChatEngine {
    config: EngineConfig,
    events: EventBroadcaster,
    log: MessageLog,
    presence: PresenceTracker,
    stores: DashMap<UserId, Arc<ConversationStore>>,
}

impl ChatEngine {
    /// In-memory engine
    pub fn new(config: EngineConfig) -> Self {
        let events = EventBroadcaster::new();
        ChatEngine {
            config,
            log: MessageLog::new(events.clone()),
            presence: PresenceTracker::new(events.clone()),
            events,
            stores: DashMap::new(),
        }
    }

    /// Engine per `config`. With the journal enabled, existing records are
    /// replayed first and new ones are written by a background task; the
    /// returned handle resolves once the engine is dropped and the queue is
    /// drained.
    ///
    /// Must be called from within a tokio runtime when the journal is enabled.
    pub fn open(config: &Config) -> StoreResult<(Self, Option<JoinHandle<u64>>)> {
        let engine = Self::new(config.engine.clone());
        if !config.journal.enabled {
            return Ok((engine, None));
        }

        let path = &config.journal.path;
        if path.exists() {
            let restored = engine.log.restore(read_journal(path)?)?;
            info!(path = %path.display(), records = restored, "journal replayed");
        }

        let (writer, handle) = spawn_journal(Journal::open(path.clone())?);
        let ChatEngine { config, events, log, presence, stores } = engine;
        let engine = ChatEngine { config, events, log: log.with_journal(writer), presence, stores };
        Ok((engine, Some(handle)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.log
    }

    pub fn presence_tracker(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Receive every event emitted from now on
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Feed events to `sink` on a background task
    pub fn attach_dispatcher(&self, sink: Arc<dyn NotificationSink>) -> NotificationDispatcher {
        NotificationDispatcher::spawn(&self.events, sink)
    }

    pub fn start_conversation(
        &self,
        a: UserId,
        b: UserId,
        subject: impl Into<String>,
    ) -> StoreResult<Conversation> {
        self.log.open_conversation(a, b, subject)
    }

    /// Send a server-stamped message. A successful send ends the sender's
    /// typing indicator in that conversation.
    pub fn send(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        body: impl Into<String>,
        reply_to: Option<MessageId>,
    ) -> StoreResult<Message> {
        let mut draft = NewMessage::new(conversation_id.clone(), sender_id.clone(), body);
        draft.reply_to = reply_to;
        self.send_draft(draft)
    }

    /// Send a fully specified draft, e.g. one carrying a client timestamp
    pub fn send_draft(&self, draft: NewMessage) -> StoreResult<Message> {
        let message = self.log.append(draft)?;
        self.presence.clear_typing(&message.sender_id, &message.conversation_id);
        Ok(message)
    }

    pub fn ack_delivered(&self, message_id: &MessageId) -> StoreResult<Transition> {
        self.log.mark_delivered(message_id)
    }

    pub fn ack_read(&self, message_id: &MessageId) -> StoreResult<Transition> {
        self.log.mark_read(message_id)
    }

    /// Messages after `since_seq`
    pub fn history(&self, conversation_id: &ConversationId, since_seq: u64) -> StoreResult<LogCursor> {
        self.log.get(conversation_id, since_seq)
    }

    /// One page of history; `limit` defaults to the configured page size
    pub fn page(
        &self,
        conversation_id: &ConversationId,
        since_seq: u64,
        limit: Option<usize>,
    ) -> StoreResult<MessagePage> {
        self.log.page(conversation_id, since_seq, limit.unwrap_or(self.config.default_page_size))
    }

    /// `owner`'s conversation store, created and attached on first use
    pub fn conversations(&self, owner: &UserId) -> StoreResult<Arc<ConversationStore>> {
        if let Some(store) = self.stores.get(owner) {
            return Ok(Arc::clone(store.value()));
        }

        match self.stores.entry(owner.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let store = Arc::new(
                    ConversationStore::new(owner.clone()).with_preview_chars(self.config.preview_chars),
                );
                self.log.attach_observer(store.clone())?;
                entry.insert(Arc::clone(&store));
                info!(%owner, "conversation store attached");
                Ok(store)
            }
        }
    }

    pub fn pin(&self, owner: &UserId, conversation_id: &ConversationId) -> StoreResult<ConversationSnapshot> {
        self.authorize(owner, conversation_id)?;
        self.conversations(owner)?.toggle_pin(conversation_id)
    }

    pub fn archive(&self, owner: &UserId, conversation_id: &ConversationId) -> StoreResult<ConversationSnapshot> {
        self.authorize(owner, conversation_id)?;
        self.conversations(owner)?.toggle_archive(conversation_id)
    }

    /// Start or refresh `user_id`'s typing indicator.
    ///
    /// Returns `true` if this started a new indicator.
    pub fn heartbeat_typing(&self, user_id: &UserId, conversation_id: &ConversationId) -> StoreResult<bool> {
        self.authorize(user_id, conversation_id)?;
        Ok(self.presence.set_typing(user_id, conversation_id))
    }

    pub fn clear_typing(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        self.presence.clear_typing(user_id, conversation_id)
    }

    pub fn is_typing(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        self.presence.is_typing(user_id, conversation_id)
    }

    pub fn set_online(&self, user_id: &UserId) {
        self.presence.set_online(user_id);
    }

    pub fn set_offline(&self, user_id: &UserId) {
        self.presence.set_offline(user_id);
    }

    pub fn presence(&self, user_id: &UserId) -> Option<PresenceState> {
        self.presence.snapshot(user_id)
    }

    /// Forget users offline for longer than the configured idle timeout
    pub fn collect_presence_garbage(&self) -> usize {
        self.presence.collect_garbage(self.config.presence_idle_timeout)
    }

    /// Conversation header, if `user_id` takes part in it
    fn authorize(&self, user_id: &UserId, conversation_id: &ConversationId) -> StoreResult<Conversation> {
        let conversation = self.log.conversation(conversation_id)?;
        if !conversation.has_participant(user_id) {
            return Err(StoreError::NotParticipant {
                conversation_id: conversation_id.clone(),
                user_id: user_id.clone(),
            });
        }
        Ok(conversation)
    }
}

impl Default for ChatEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
