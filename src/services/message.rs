//! Message store — append-only per-chat logs.
//!
//! DESIGN
//! ======
//! `add_message` is the only way a message comes into existence. Under one
//! write guard it appends to the chat's log and folds the message into the
//! chat record (last message, timestamp, recipient unread counter). The
//! recipient is derived from `sender_type`, so only the party that did not
//! send sees its counter move. Messages are never edited, removed, or
//! reordered.

use tracing::info;
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::analytics::AnalyticsEvent;
use crate::services::directory::{self, ChatError};
use crate::state::{AppState, Chat, ChatStore, Message, MessageStatus, NewMessage};

/// Reject a message with blank content and no attachment.
///
/// # Errors
///
/// Returns `EmptyMessage`.
pub fn validate(new_message: &NewMessage) -> Result<(), ChatError> {
    if new_message.content.trim().is_empty() && new_message.file_url.is_none() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(())
}

/// Append a message to its chat and return it with the updated chat.
///
/// # Errors
///
/// Returns `NotFound` if `chat_id` does not reference a chat, and
/// `EmptyMessage` if the content is blank and no file is attached.
pub async fn add_message(state: &AppState, new_message: NewMessage) -> Result<(Message, Chat), ChatError> {
    validate(&new_message)?;
    let (message, chat) = {
        let mut store = state.store.write().await;
        append_locked(&mut store, new_message)?
    };
    record_added(state, &message);
    Ok((message, chat))
}

/// Append under a caller-held store guard. Callers that need to check the
/// chat before writing do so under the same guard, then call
/// `record_added` once the guard is released.
pub(crate) fn append_locked(store: &mut ChatStore, new_message: NewMessage) -> Result<(Message, Chat), ChatError> {
    let chat_id = new_message.chat_id;
    let Some(chat) = store.chats.get_mut(&chat_id) else {
        return Err(ChatError::NotFound(chat_id));
    };

    // Timestamps never go backwards within a chat, even if the clock does.
    let timestamp = chat
        .last_message
        .as_ref()
        .map_or(now_ms(), |last| now_ms().max(last.timestamp));

    let message = Message {
        id: Uuid::new_v4(),
        chat_id,
        sender_id: new_message.sender_id,
        sender_name: new_message.sender_name,
        sender_type: new_message.sender_type,
        content: new_message.content,
        kind: new_message.kind,
        status: MessageStatus::Sent,
        file_url: new_message.file_url,
        file_name: new_message.file_name,
        timestamp,
    };

    directory::apply_message(chat, &message);
    let chat = chat.clone();
    store
        .messages
        .entry(chat_id)
        .or_default()
        .push(message.clone());
    Ok((message, chat))
}

/// Log and track a message appended with `append_locked`.
pub(crate) fn record_added(state: &AppState, message: &Message) {
    info!(
        chat_id = %message.chat_id,
        message_id = %message.id,
        sender_type = message.sender_type.as_str(),
        "message added"
    );
    state.analytics.track(AnalyticsEvent::MessageSent {
        chat_id: message.chat_id,
        sender_type: message.sender_type,
    });
}

/// Messages of a chat in creation order. Empty if the chat has none (or
/// does not exist).
pub async fn get_chat_messages(state: &AppState, chat_id: Uuid) -> Vec<Message> {
    let store = state.store.read().await;
    store.messages.get(&chat_id).cloned().unwrap_or_default()
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
