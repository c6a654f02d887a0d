//! Presence and typing state
//!
//! A typing indicator lives for [`TYPING_TTL`] after its last refresh. Expiry
//! is enforced twice: a timer task on the current tokio runtime removes the
//! record when the deadline passes, and every read treats a record past its
//! deadline as gone. Without a runtime only the read-side check applies.
//!
//! Events fire on transitions only. Each typing record that is removed, by
//! timer, read, explicit clear or going offline, produces exactly one
//! `TypingExpired`.

use crate::core_events::{CoreEvent, EventBroadcaster};
use crate::core_store::model::{ConversationId, Timestamp, UserId};
use crate::metrics::{self as core_metrics, TYPING_EXPIRED, TYPING_STARTED, USERS_ONLINE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// How long a typing indicator survives without a refresh
pub const TYPING_TTL: Duration = Duration::from_millis(3000);

/// Public view of one user's presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen_at: Option<Timestamp>,
    pub typing_in_conversation_id: Option<ConversationId>,
}

struct TypingRecord {
    conversation_id: ConversationId,
    expires_at: Instant,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl TypingRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct UserPresence {
    online: bool,
    last_seen_at: Option<Timestamp>,
    typing: Option<TypingRecord>,
    last_activity: Instant,
}

impl UserPresence {
    fn new(now: Instant) -> Self {
        UserPresence { online: false, last_seen_at: None, typing: None, last_activity: now }
    }
}

#[derive(Default)]
struct PresenceInner {
    users: HashMap<UserId, UserPresence>,
    next_generation: u64,
}

impl PresenceInner {
    fn user(&mut self, user_id: &UserId, now: Instant) -> &mut UserPresence {
        let presence = self
            .users
            .entry(user_id.clone())
            .or_insert_with(|| UserPresence::new(now));
        presence.last_activity = now;
        presence
    }

    fn online_count(&self) -> usize {
        self.users.values().filter(|p| p.online).count()
    }
}

/// Tracks online state and typing indicators
pub struct PresenceTracker {
    inner: Arc<Mutex<PresenceInner>>,
    events: EventBroadcaster,
}

impl PresenceTracker {
    pub fn new(events: EventBroadcaster) -> Self {
        PresenceTracker { inner: Arc::new(Mutex::new(PresenceInner::default())), events }
    }

    /// Start or refresh a typing indicator.
    ///
    /// Returns `true` when the user was not already typing in this
    /// conversation (a `TypingStarted` event was emitted).
    pub fn set_typing(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let presence = inner.user(user_id, now);

        let mut started = true;
        if let Some(mut previous) = presence.typing.take() {
            previous.cancel_timer();
            if previous.conversation_id == *conversation_id && previous.is_live(now) {
                started = false;
            } else {
                self.emit_expired(user_id, previous.conversation_id);
            }
        }

        let expires_at = now + TYPING_TTL;
        presence.typing = Some(TypingRecord {
            conversation_id: conversation_id.clone(),
            expires_at,
            generation,
            timer: self.schedule_expiry(user_id.clone(), generation, expires_at),
        });

        if started {
            core_metrics::record_counter(TYPING_STARTED, 1);
            debug!(%user_id, %conversation_id, "typing started");
            self.events.emit(CoreEvent::TypingStarted {
                conversation_id: conversation_id.clone(),
                user_id: user_id.clone(),
                at: Timestamp::now(),
            });
        } else {
            trace!(%user_id, %conversation_id, "typing refreshed");
        }
        started
    }

    /// Clear a typing indicator now. Returns `false` if the user was not
    /// typing in `conversation_id`.
    pub fn clear_typing(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        let presence = inner.user(user_id, now);

        let matches = presence
            .typing
            .as_ref()
            .map_or(false, |record| record.conversation_id == *conversation_id);
        if !matches {
            return false;
        }

        if let Some(mut record) = presence.typing.take() {
            record.cancel_timer();
            let was_live = record.is_live(now);
            self.emit_expired(user_id, record.conversation_id);
            return was_live;
        }
        false
    }

    /// Whether `user_id` is typing in `conversation_id` right now
    pub fn is_typing(&self, user_id: &UserId, conversation_id: &ConversationId) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        let presence = match inner.users.get_mut(user_id) {
            Some(presence) => presence,
            None => return false,
        };
        self.expire_if_due(user_id, presence, now);
        presence
            .typing
            .as_ref()
            .map_or(false, |record| record.conversation_id == *conversation_id)
    }

    /// Users currently typing in `conversation_id`, sorted
    pub fn typing_in(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        let now = Instant::now();
        let mut inner = self.lock();
        let mut typing: Vec<UserId> = Vec::new();
        for (user_id, presence) in inner.users.iter_mut() {
            self.expire_if_due(user_id, presence, now);
            if presence.typing.as_ref().map_or(false, |r| r.conversation_id == *conversation_id) {
                typing.push(user_id.clone());
            }
        }
        typing.sort();
        typing
    }

    pub fn set_online(&self, user_id: &UserId) {
        let now = Instant::now();
        let mut inner = self.lock();
        let presence = inner.user(user_id, now);
        if presence.online {
            return;
        }
        presence.online = true;
        let online = inner.online_count();
        core_metrics::record_gauge(USERS_ONLINE, online as f64);
        debug!(%user_id, online, "user online");
    }

    /// Mark offline, record `last_seen_at` and drop any typing indicator
    pub fn set_offline(&self, user_id: &UserId) {
        let now = Instant::now();
        let mut inner = self.lock();
        let presence = inner.user(user_id, now);

        if let Some(mut record) = presence.typing.take() {
            record.cancel_timer();
            self.emit_expired(user_id, record.conversation_id);
        }
        if !presence.online {
            return;
        }
        presence.online = false;
        presence.last_seen_at = Some(Timestamp::now());
        let online = inner.online_count();
        core_metrics::record_gauge(USERS_ONLINE, online as f64);
        debug!(%user_id, online, "user offline");
    }

    /// Current presence of a user, `None` if never seen
    pub fn snapshot(&self, user_id: &UserId) -> Option<PresenceState> {
        let now = Instant::now();
        let mut inner = self.lock();
        let presence = inner.users.get_mut(user_id)?;
        self.expire_if_due(user_id, presence, now);
        Some(PresenceState {
            user_id: user_id.clone(),
            online: presence.online,
            last_seen_at: presence.last_seen_at,
            typing_in_conversation_id: presence.typing.as_ref().map(|r| r.conversation_id.clone()),
        })
    }

    /// Forget offline users idle for longer than `max_idle`.
    /// Returns the number of users removed.
    pub fn collect_garbage(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        let before = inner.users.len();
        inner.users.retain(|user_id, presence| {
            self.expire_if_due(user_id, presence, now);
            presence.online
                || presence.typing.is_some()
                || now.duration_since(presence.last_activity) <= max_idle
        });
        let removed = before - inner.users.len();
        if removed > 0 {
            debug!(removed, "presence garbage collected");
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, PresenceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the typing record if its deadline has passed
    fn expire_if_due(&self, user_id: &UserId, presence: &mut UserPresence, now: Instant) {
        let due = presence.typing.as_ref().map_or(false, |record| !record.is_live(now));
        if due {
            if let Some(mut record) = presence.typing.take() {
                record.cancel_timer();
                self.emit_expired(user_id, record.conversation_id);
            }
        }
    }

    fn emit_expired(&self, user_id: &UserId, conversation_id: ConversationId) {
        core_metrics::record_counter(TYPING_EXPIRED, 1);
        debug!(%user_id, %conversation_id, "typing expired");
        self.events.emit(CoreEvent::TypingExpired {
            conversation_id,
            user_id: user_id.clone(),
            at: Timestamp::now(),
        });
    }

    fn schedule_expiry(&self, user_id: UserId, generation: u64, deadline: Instant) -> Option<JoinHandle<()>> {
        let handle = Handle::try_current().ok()?;
        let inner: Weak<Mutex<PresenceInner>> = Arc::downgrade(&self.inner);
        let events = self.events.clone();

        Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let inner = match inner.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            let presence = match inner.users.get_mut(&user_id) {
                Some(presence) => presence,
                None => return,
            };
            let current = presence.typing.as_ref().map_or(false, |r| r.generation == generation);
            if !current {
                return;
            }
            if let Some(record) = presence.typing.take() {
                core_metrics::record_counter(TYPING_EXPIRED, 1);
                debug!(%user_id, conversation_id = %record.conversation_id, "typing timed out");
                events.emit(CoreEvent::TypingExpired {
                    conversation_id: record.conversation_id,
                    user_id,
                    at: Timestamp::now(),
                });
            }
        }))
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        let mut inner = self.lock();
        for presence in inner.users.values_mut() {
            if let Some(record) = presence.typing.as_mut() {
                record.cancel_timer();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{alice, bob, drain_events};

    fn conv(id: &str) -> ConversationId {
        ConversationId::new(id.to_string())
    }

    fn kinds(events: &[CoreEvent]) -> Vec<&'static str> {
        events.iter().map(CoreEvent::kind).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_expires_after_ttl() {
        let tracker = PresenceTracker::new(EventBroadcaster::new());
        let c1 = conv("c1");

        assert!(tracker.set_typing(&alice(), &c1));

        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(tracker.is_typing(&alice(), &c1));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(!tracker.is_typing(&alice(), &c1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_expires_without_reads() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let tracker = PresenceTracker::new(events);

        tracker.set_typing(&alice(), &conv("c1"));
        tokio::time::sleep(TYPING_TTL + Duration::from_millis(1)).await;

        let seen = drain_events(&mut rx);
        assert_eq!(kinds(&seen), vec!["typing_started", "typing_expired"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_extends_without_new_event() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let tracker = PresenceTracker::new(events);
        let c1 = conv("c1");

        assert!(tracker.set_typing(&alice(), &c1));
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(!tracker.set_typing(&alice(), &c1));
        tokio::time::advance(Duration::from_millis(2000)).await;

        assert!(tracker.is_typing(&alice(), &c1));
        assert_eq!(kinds(&drain_events(&mut rx)), vec!["typing_started"]);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!tracker.is_typing(&alice(), &c1));
        assert_eq!(kinds(&drain_events(&mut rx)), vec!["typing_expired"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_conversation_expires_previous() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let tracker = PresenceTracker::new(events);

        tracker.set_typing(&alice(), &conv("c1"));
        tracker.set_typing(&alice(), &conv("c2"));

        assert!(!tracker.is_typing(&alice(), &conv("c1")));
        assert!(tracker.is_typing(&alice(), &conv("c2")));
        assert_eq!(
            kinds(&drain_events(&mut rx)),
            vec!["typing_started", "typing_expired", "typing_started"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_typing_emits_once() {
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let tracker = PresenceTracker::new(events);
        let c1 = conv("c1");

        tracker.set_typing(&alice(), &c1);
        assert!(tracker.clear_typing(&alice(), &c1));
        assert!(!tracker.clear_typing(&alice(), &c1));
        assert!(!tracker.is_typing(&alice(), &c1));

        // The aborted timer must not fire a second expiry
        tokio::time::sleep(TYPING_TTL * 2).await;
        assert_eq!(kinds(&drain_events(&mut rx)), vec!["typing_started", "typing_expired"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_records_last_seen_and_clears_typing() {
        let tracker = PresenceTracker::new(EventBroadcaster::new());
        let c1 = conv("c1");

        tracker.set_online(&alice());
        tracker.set_typing(&alice(), &c1);
        tracker.set_offline(&alice());

        let state = tracker.snapshot(&alice()).unwrap();
        assert!(!state.online);
        assert!(state.last_seen_at.is_some());
        assert_eq!(state.typing_in_conversation_id, None);
        assert!(tracker.snapshot(&bob()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_in_lists_live_users() {
        let tracker = PresenceTracker::new(EventBroadcaster::new());
        let c1 = conv("c1");

        tracker.set_typing(&bob(), &c1);
        tokio::time::advance(Duration::from_millis(1500)).await;
        tracker.set_typing(&alice(), &c1);
        assert_eq!(tracker.typing_in(&c1), vec![alice(), bob()]);

        tokio::time::advance(Duration::from_millis(1600)).await;
        assert_eq!(tracker.typing_in(&c1), vec![alice()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_garbage_keeps_active_users() {
        let tracker = PresenceTracker::new(EventBroadcaster::new());
        tracker.set_online(&alice());
        tracker.set_online(&bob());
        tracker.set_offline(&bob());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(tracker.collect_garbage(Duration::from_secs(60)), 1);
        assert!(tracker.snapshot(&alice()).is_some());
        assert!(tracker.snapshot(&bob()).is_none());
    }

    #[test]
    fn test_lazy_expiry_without_runtime() {
        let tracker = PresenceTracker::new(EventBroadcaster::new());
        let c1 = conv("c1");
        assert!(tracker.set_typing(&alice(), &c1));
        assert!(tracker.is_typing(&alice(), &c1));
    }
}
