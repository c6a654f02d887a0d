/*
    filter.rs - Conversation list filters and sort keys
*/

use serde::{Deserialize, Serialize};

/// Which conversations a list shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationView {
    /// Everything not archived
    #[default]
    Inbox,
    /// Not archived, with at least one unread message
    Unread,
    /// Pinned and not archived
    Pinned,
    Archived,
}

/// Ordering of a conversation list.
///
/// Pinned conversations always come first; the key orders within each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum SortKey {
    /// Newest last-message `createdAt` first, ties by conversation id
    #[default]
    LastActivity,
}

/// View plus optional free-text match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub view: ConversationView,
    /// Lowercased needle
    query: Option<String>,
}

impl ListFilter {
    pub fn new(view: ConversationView) -> Self {
        ListFilter { view, query: None }
    }

    pub fn inbox() -> Self {
        Self::new(ConversationView::Inbox)
    }

    pub fn unread() -> Self {
        Self::new(ConversationView::Unread)
    }

    pub fn pinned() -> Self {
        Self::new(ConversationView::Pinned)
    }

    pub fn archived() -> Self {
        Self::new(ConversationView::Archived)
    }

    /// Case-insensitive match against participant names or the subject.
    /// Blank text matches everything.
    pub fn matching(mut self, text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim();
        self.query = if text.is_empty() { None } else { Some(text.to_lowercase()) };
        self
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Whether flags and counter pass the view
    pub fn admits(&self, pinned: bool, archived: bool, unread: u64) -> bool {
        match self.view {
            ConversationView::Inbox => !archived,
            ConversationView::Unread => !archived && unread > 0,
            ConversationView::Pinned => pinned && !archived,
            ConversationView::Archived => archived,
        }
    }

    /// Whether any of `haystacks` contains the query
    pub fn matches_text<'a>(&self, haystacks: impl IntoIterator<Item = &'a str>) -> bool {
        match &self.query {
            None => true,
            Some(needle) => haystacks.into_iter().any(|h| h.to_lowercase().contains(needle.as_str())),
        }
    }
}
