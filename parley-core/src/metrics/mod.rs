//! Metrics collection for observability
//!
//! Thin layer over the `metrics` facade. Nothing is exported unless the host
//! application installs a recorder.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

// Message log
pub const MESSAGES_APPENDED: &str = "log.messages.appended";
pub const APPENDS_OUT_OF_ORDER: &str = "log.appends.out_of_order";
pub const APPENDS_REJECTED: &str = "log.appends.rejected";
pub const APPEND_DURATION_MS: &str = "log.append.duration_ms";
pub const DELIVERY_TRANSITIONS: &str = "log.delivery.transitions";
pub const DELIVERY_REJECTED: &str = "log.delivery.rejected";
pub const CONVERSATIONS_OPENED: &str = "log.conversations.opened";

// Presence
pub const TYPING_STARTED: &str = "presence.typing.started";
pub const TYPING_EXPIRED: &str = "presence.typing.expired";
pub const USERS_ONLINE: &str = "presence.users.online";

// Notifications
pub const NOTIFY_DELIVERED: &str = "notify.delivered";
pub const NOTIFY_FAILED: &str = "notify.failed";

// Journal
pub const JOURNAL_RECORDS: &str = "journal.records.written";
pub const JOURNAL_ERRORS: &str = "journal.errors";

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(MESSAGES_APPENDED, "Messages committed to conversation logs");
    describe_counter!(APPENDS_OUT_OF_ORDER, "Appends rejected for a non-monotonic createdAt");
    describe_counter!(APPENDS_REJECTED, "Appends rejected for any other validation failure");
    describe_histogram!(APPEND_DURATION_MS, "Append critical section duration in milliseconds");
    describe_counter!(DELIVERY_TRANSITIONS, "Delivery state transitions applied");
    describe_counter!(DELIVERY_REJECTED, "Backward delivery transitions rejected");
    describe_counter!(CONVERSATIONS_OPENED, "Conversations created");

    describe_counter!(TYPING_STARTED, "Typing indicators started");
    describe_counter!(TYPING_EXPIRED, "Typing indicators expired or cleared");
    describe_gauge!(USERS_ONLINE, "Users currently marked online");

    describe_counter!(NOTIFY_DELIVERED, "Events accepted by the notification sink");
    describe_counter!(NOTIFY_FAILED, "Events the notification sink failed on");

    describe_counter!(JOURNAL_RECORDS, "Records appended to the journal");
    describe_counter!(JOURNAL_ERRORS, "Journal write failures");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}

/// Record a gauge metric
pub fn record_gauge(name: &'static str, value: f64) {
    gauge!(name).set(value);
}

/// Record a histogram metric
pub fn record_histogram(name: &'static str, value: f64) {
    histogram!(name).record(value);
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) {
        record_histogram(self.name, self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
