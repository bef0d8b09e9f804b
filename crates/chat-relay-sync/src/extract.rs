//! Reading a message element into a [`Message`].

use chat_relay_core::{ChatId, ElementHandle, Message, MessageId, MessageKind, Selectors};

use crate::engine::SyncError;

/// Classify and read one message element.
///
/// Text wins over image when both regions exist.
///
/// # Errors
/// Returns `MalformedMessage` if the id, author or time is missing.
pub async fn read_message<E: ElementHandle>(
    chat: &ChatId,
    element: &E,
    selectors: &Selectors,
) -> Result<Message, SyncError> {
    let kind = if let Some(body) = element.query(&selectors.message_text).await? {
        MessageKind::Text {
            text: body.text().await?.unwrap_or_default(),
        }
    } else if element.query(&selectors.message_image).await?.is_some() {
        MessageKind::Image
    } else {
        MessageKind::Unsupported
    };

    let sender = required_text(chat, element, &selectors.message_author, "sender").await?;
    let time = required_text(chat, element, &selectors.message_time, "time").await?;
    let id = element
        .attribute(&selectors.message_id_attribute)
        .await?
        .ok_or_else(|| SyncError::MalformedMessage {
            chat: chat.clone(),
            field: "id",
        })?;

    Ok(Message {
        id: MessageId::new(id),
        chat: chat.clone(),
        sender,
        time,
        kind,
    })
}

async fn required_text<E: ElementHandle>(
    chat: &ChatId,
    element: &E,
    selector: &str,
    field: &'static str,
) -> Result<String, SyncError> {
    let malformed = || SyncError::MalformedMessage {
        chat: chat.clone(),
        field,
    };
    let region = element.query(selector).await?.ok_or_else(malformed)?;
    region.text().await?.ok_or_else(malformed)
}
