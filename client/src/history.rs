//! Ordered message list — dedup and order-preserving merge.
//!
//! DESIGN
//! ======
//! The list is the single de-duplication boundary in the system: everything
//! upstream (pushes, sync batches, page loads) may deliver the same message
//! more than once, in any order, and relies on [`MessageList::add_message`]
//! to keep the sequence unique by id and non-decreasing by `created_at`.
//!
//! Messages sharing a timestamp keep arrival order; there is deliberately
//! no secondary sort by id.

use protocol::ChatMessage;
use time::OffsetDateTime;

/// An ordered sequence of messages, unique by id, non-decreasing by
/// `created_at`. Owned by a single chat view; not internally synchronized.
#[derive(Debug, Default)]
pub struct MessageList {
    messages: Vec<ChatMessage>,
}

impl MessageList {
    #[must_use]
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    /// Seed the list from an initial history page. The page is taken as
    /// given; it is expected to already be ordered.
    #[must_use]
    pub fn from_initial(initial: Vec<ChatMessage>) -> Self {
        Self { messages: initial }
    }

    /// Insert `msg` before the first element whose `created_at` is strictly
    /// greater; append if none. O(n), fine for bounded page sizes.
    pub fn insert_sorted(&mut self, msg: ChatMessage) {
        match self.messages.iter().position(|m| m.created_at > msg.created_at) {
            Some(idx) => self.messages.insert(idx, msg),
            None => self.messages.push(msg),
        }
    }

    /// Insert `msg` unless a message with the same id is already present.
    /// Returns whether the list changed.
    pub fn add_message(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        self.insert_sorted(msg);
        true
    }

    /// Apply [`Self::add_message`] for every incoming message, in the given
    /// order. Net effect is duplicate- and order-insensitive because each
    /// insert positions by value, not by arrival index.
    pub fn merge_messages(&mut self, incoming: impl IntoIterator<Item = ChatMessage>) {
        for msg in incoming {
            self.add_message(msg);
        }
    }

    /// The sync watermark: `created_at` of the most recent known message.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<OffsetDateTime> {
        self.messages.last().map(|m| m.created_at)
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
