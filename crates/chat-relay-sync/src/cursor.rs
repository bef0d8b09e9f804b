//! Per-chat cursor: the last message already delivered.

use std::collections::HashMap;

use chat_relay_core::{ChatId, MessageId};

/// Mapping from chat to the last message delivered from it.
///
/// Entries are created lazily and only ever move forward; there is no
/// removal. An absent entry means discovery starts at the unread marker.
#[derive(Debug, Default, Clone)]
pub struct CursorMap {
    positions: HashMap<ChatId, MessageId>,
}

impl CursorMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, chat: &ChatId) -> Option<&MessageId> {
        self.positions.get(chat)
    }

    /// Record `last` as the newest message seen in `chat`.
    /// Returns whether the stored position changed.
    pub fn advance(&mut self, chat: &ChatId, last: MessageId) -> bool {
        match self.positions.get_mut(chat) {
            Some(current) if *current == last => false,
            Some(current) => {
                *current = last;
                true
            }
            None => {
                self.positions.insert(chat.clone(), last);
                true
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChatId, &MessageId)> {
        self.positions.iter()
    }
}
