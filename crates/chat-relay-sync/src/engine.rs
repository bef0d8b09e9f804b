//! Cursor-based discovery of new messages.

use std::sync::Arc;

use chat_relay_core::{
    AdapterConfig, Chat, ChatId, ElementHandle, Message, MessageId, PageSurface, SurfaceError,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{cursor::CursorMap, extract::read_message};

/// Discovery pass error.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("Malformed message in chat {chat}: missing {field}")]
    MalformedMessage { chat: ChatId, field: &'static str },
}

/// Discovers messages that appeared since the previous pass.
///
/// Switching chats is not reentrant. `discover_new_messages` takes
/// `&mut self`, so callers sharing an engine must serialize passes.
pub struct SyncEngine<S: PageSurface> {
    surface: Arc<S>,
    config: Arc<AdapterConfig>,
    cursors: CursorMap,
    active: Option<ChatId>,
}

impl<S: PageSurface> SyncEngine<S> {
    #[must_use]
    pub fn new(surface: Arc<S>, config: Arc<AdapterConfig>) -> Self {
        Self {
            surface,
            config,
            cursors: CursorMap::new(),
            active: None,
        }
    }

    #[must_use]
    pub const fn cursors(&self) -> &CursorMap {
        &self.cursors
    }

    /// Chat the engine believes is open, once known.
    #[must_use]
    pub const fn active_chat(&self) -> Option<&ChatId> {
        self.active.as_ref()
    }

    /// Run one discovery pass.
    ///
    /// Reads the open chat first, then visits every chat with a pending
    /// notification in list order. Messages come back in visiting order,
    /// chronological within each chat. Cursors advance per chat as each
    /// chat is finished, and are kept if a later chat fails.
    ///
    /// # Errors
    /// Returns error if the page misbehaves or a message element is malformed.
    pub async fn discover_new_messages(&mut self) -> Result<Vec<Message>, SyncError> {
        let mut discovered = Vec::new();

        let current = self.resolve_open_chat().await?;
        discovered.extend(self.drain_chat(&current).await?);

        let notified = self.chats_with_notifications().await?;
        let visited = notified.len() + 1;
        for chat in notified {
            self.open_chat(&chat).await?;
            discovered.extend(self.drain_chat(&chat.id).await?);
        }

        info!(count = discovered.len(), chats = visited, "discovery pass complete");
        Ok(discovered)
    }

    async fn resolve_open_chat(&mut self) -> Result<ChatId, SyncError> {
        if let Some(active) = &self.active {
            return Ok(active.clone());
        }

        let selectors = &self.config.selectors;
        let resolved = match self.surface.find(&selectors.active_chat_entry).await? {
            Some(entry) => entry.attribute(&selectors.chat_id_attribute).await?,
            None => None,
        };

        match resolved {
            Some(id) => {
                let id = ChatId::new(id);
                debug!(chat = %id, "resolved open chat");
                self.active = Some(id.clone());
                Ok(id)
            }
            None => Ok(ChatId::unresolved()),
        }
    }

    async fn drain_chat(&mut self, chat: &ChatId) -> Result<Vec<Message>, SyncError> {
        let selectors = &self.config.selectors;
        let mut messages = Vec::new();

        let mut position = self.starting_point(chat).await?;
        while let Some(element) = position {
            position = element.next_sibling().await?;
            let Some(sibling) = &position else { break };
            if !sibling.matches(&selectors.message).await? {
                continue;
            }
            messages.push(read_message(chat, sibling, selectors).await?);
        }

        // Last message element present, not the last one read.
        let present = self.surface.find_all(&selectors.messages_in_list()).await?;
        if let Some(last) = present.last() {
            let id = last
                .attribute(&selectors.message_id_attribute)
                .await?
                .ok_or_else(|| SyncError::MalformedMessage {
                    chat: chat.clone(),
                    field: "id",
                })?;
            if self.cursors.advance(chat, MessageId::new(id)) {
                debug!(chat = %chat, cursor = ?self.cursors.get(chat), "cursor advanced");
            }
        }

        Ok(messages)
    }

    async fn starting_point(&self, chat: &ChatId) -> Result<Option<S::Element>, SyncError> {
        let selectors = &self.config.selectors;

        if let Some(last) = self.cursors.get(chat) {
            let resumed = self
                .surface
                .find(&selectors.message_by_id(last.as_str()))
                .await?;
            if resumed.is_some() {
                return Ok(resumed);
            }
            warn!(
                chat = %chat,
                cursor = %last,
                "cursor element gone, falling back to unread marker"
            );
        }

        let marker = self.surface.find(&selectors.unread_messages_notice).await?;
        if marker.is_none() {
            debug!(chat = %chat, "no cursor and no unread marker");
        }
        Ok(marker)
    }

    async fn chats_with_notifications(&self) -> Result<Vec<Chat<S::Element>>, SyncError> {
        let selectors = &self.config.selectors;
        let icons = self.surface.find_all(&selectors.notification_icon).await?;

        let mut chats = Vec::with_capacity(icons.len());
        for icon in icons {
            let Some(entry) = icon.closest(&selectors.chat_entry).await? else {
                warn!("notification badge outside any chat entry");
                continue;
            };
            let Some(id) = entry.attribute(&selectors.chat_id_attribute).await? else {
                warn!("chat entry without an id");
                continue;
            };
            chats.push(Chat {
                id: ChatId::new(id),
                handle: entry,
            });
        }
        Ok(chats)
    }

    async fn open_chat(&mut self, chat: &Chat<S::Element>) -> Result<(), SyncError> {
        debug!(chat = %chat.id, "switching chat");
        chat.handle.click().await?;
        // The page has switched even if the re-render below never completes.
        self.active = Some(chat.id.clone());
        self.surface
            .wait_for(&self.config.selectors.messages_list, self.config.render_timeout())
            .await?;
        // No completion signal for the list re-render.
        self.surface.wait_for_millis(self.config.settle_delay_ms).await;
        Ok(())
    }
}
