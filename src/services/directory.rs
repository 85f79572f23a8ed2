//! Chat directory — the authoritative list of support conversations.
//!
//! DESIGN
//! ======
//! Each operation takes the store write lock once and runs to completion
//! under it, so callers observe every mutation atomically. `add_chat` does
//! not enforce one chat per customer; the widget path goes through
//! `open_chat_for_user`, which reuses the customer's latest open chat.
//!
//! Status transitions are not validated: any caller may set any status.
//! The only automatic transition (waiting → active on the first support
//! reply) lives in the message store.

use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::now_ms;
use crate::services::analytics::AnalyticsEvent;
use crate::state::{AppState, Chat, ChatPatch, ChatStatus, ChatStore, Message, NewChat, SenderType};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat not found: {0}")]
    NotFound(Uuid),
    #[error("chat {0} belongs to another user")]
    Forbidden(Uuid),
    #[error("message has no content")]
    EmptyMessage,
}

impl crate::frame::ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_CHAT_NOT_FOUND",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
        }
    }
}

// =============================================================================
// CREATE
// =============================================================================

/// Create a chat. Unread counters start at zero; status defaults to
/// `waiting` and priority to `medium`.
pub async fn add_chat(state: &AppState, new_chat: NewChat) -> Chat {
    let chat = {
        let mut store = state.store.write().await;
        insert_chat(&mut store, new_chat)
    };
    record_created(state, &chat);
    chat
}

/// Widget open: return the customer's most recently updated chat that is
/// not closed, creating one if none exists. The flag is true on creation.
///
/// Lookup and creation share one write guard, so concurrent opens by the
/// same customer never create two chats.
pub async fn open_chat_for_user(state: &AppState, new_chat: NewChat) -> (Chat, bool) {
    let chat = {
        let mut store = state.store.write().await;
        let existing = store
            .chats
            .values()
            .filter(|c| c.user_id == new_chat.user_id && c.status != ChatStatus::Closed)
            .max_by_key(|c| (c.updated_at, c.created_at));
        if let Some(chat) = existing {
            return (chat.clone(), false);
        }
        insert_chat(&mut store, new_chat)
    };
    record_created(state, &chat);
    (chat, true)
}

fn insert_chat(store: &mut ChatStore, new_chat: NewChat) -> Chat {
    let now = now_ms();
    let chat = Chat {
        id: Uuid::new_v4(),
        user_id: new_chat.user_id,
        user_name: new_chat.user_name,
        user_email: new_chat.user_email,
        status: new_chat.status.unwrap_or(ChatStatus::Waiting),
        priority: new_chat.priority.unwrap_or_default(),
        unread_count: 0,
        user_unread_count: 0,
        last_message: None,
        created_at: now,
        updated_at: now,
        tags: new_chat.tags,
    };
    store.chats.insert(chat.id, chat.clone());
    store.messages.entry(chat.id).or_default();
    chat
}

fn record_created(state: &AppState, chat: &Chat) {
    info!(chat_id = %chat.id, user_id = %chat.user_id, "chat created");
    state
        .analytics
        .track(AnalyticsEvent::ChatOpened { chat_id: chat.id, user_id: chat.user_id.clone() });
}

// =============================================================================
// READ
// =============================================================================

/// Fetch one chat by ID.
///
/// # Errors
///
/// Returns `NotFound` if the chat does not exist.
pub async fn get_chat(state: &AppState, chat_id: Uuid) -> Result<Chat, ChatError> {
    let store = state.store.read().await;
    store
        .chats
        .get(&chat_id)
        .cloned()
        .ok_or(ChatError::NotFound(chat_id))
}

/// Fetch a chat on behalf of a participant. Customers may only see their
/// own chats; support sees everything.
///
/// # Errors
///
/// Returns `NotFound` or `Forbidden`.
pub async fn get_chat_for(state: &AppState, chat_id: Uuid, user_id: &str, role: SenderType) -> Result<Chat, ChatError> {
    let chat = get_chat(state, chat_id).await?;
    if role == SenderType::User && chat.user_id != user_id {
        return Err(ChatError::Forbidden(chat_id));
    }
    Ok(chat)
}

/// List chats, most recently updated first, optionally filtered by status.
pub async fn list_chats(state: &AppState, status: Option<ChatStatus>) -> Vec<Chat> {
    let store = state.store.read().await;
    let mut chats: Vec<Chat> = store
        .chats
        .values()
        .filter(|c| status.is_none_or(|s| c.status == s))
        .cloned()
        .collect();
    sort_recent_first(&mut chats);
    chats
}

/// All chats with unread customer messages. No side effects.
pub async fn get_unread_chats(state: &AppState) -> Vec<Chat> {
    let store = state.store.read().await;
    let mut chats: Vec<Chat> = store
        .chats
        .values()
        .filter(|c| c.unread_count > 0)
        .cloned()
        .collect();
    sort_recent_first(&mut chats);
    chats
}

// =============================================================================
// UPDATE
// =============================================================================

/// Shallow-merge `patch` into a chat and bump `updated_at`.
///
/// Closing a chat cancels any pending automatic reply for it.
///
/// # Errors
///
/// Returns `NotFound` if the chat does not exist.
pub async fn update_chat(state: &AppState, chat_id: Uuid, patch: &ChatPatch) -> Result<Chat, ChatError> {
    let (chat, status_changed) = {
        let mut store = state.store.write().await;
        let chat = store
            .chats
            .get_mut(&chat_id)
            .ok_or(ChatError::NotFound(chat_id))?;

        if let Some(name) = &patch.user_name {
            chat.user_name.clone_from(name);
        }
        if let Some(email) = &patch.user_email {
            chat.user_email.clone_from(email);
        }
        if let Some(priority) = patch.priority {
            chat.priority = priority;
        }
        if let Some(tags) = &patch.tags {
            chat.tags.clone_from(tags);
        }
        let status_changed = patch.status.is_some_and(|s| s != chat.status);
        if let Some(status) = patch.status {
            chat.status = status;
        }
        chat.updated_at = now_ms().max(chat.updated_at);

        (chat.clone(), status_changed)
    };

    if status_changed {
        info!(%chat_id, status = chat.status.as_str(), "chat status changed");
        state
            .analytics
            .track(AnalyticsEvent::StatusChanged { chat_id, status: chat.status });
        if chat.status == ChatStatus::Closed {
            state.auto_reply.cancel(chat_id);
        }
    }

    Ok(chat)
}

/// Reset `reader`'s unread counter to zero.
///
/// # Errors
///
/// Returns `NotFound` if the chat does not exist.
pub async fn mark_chat_as_read(state: &AppState, chat_id: Uuid, reader: SenderType) -> Result<Chat, ChatError> {
    let chat = {
        let mut store = state.store.write().await;
        let chat = store
            .chats
            .get_mut(&chat_id)
            .ok_or(ChatError::NotFound(chat_id))?;
        let cleared = chat.unread_for(reader);
        match reader {
            SenderType::Admin => chat.unread_count = 0,
            SenderType::User => chat.user_unread_count = 0,
        }
        debug!(%chat_id, reader = reader.as_str(), cleared, "chat marked read");
        chat.clone()
    };

    state
        .analytics
        .track(AnalyticsEvent::ChatRead { chat_id, reader });
    Ok(chat)
}

/// Fold a freshly appended message into its chat record: denormalized
/// last message, timestamp, the recipient's unread counter, and the
/// waiting → active transition on a support reply.
pub(crate) fn apply_message(chat: &mut Chat, message: &Message) {
    match message.sender_type.recipient() {
        SenderType::Admin => chat.unread_count = chat.unread_count.saturating_add(1),
        SenderType::User => chat.user_unread_count = chat.user_unread_count.saturating_add(1),
    }
    if message.sender_type == SenderType::Admin && chat.status == ChatStatus::Waiting {
        chat.status = ChatStatus::Active;
    }
    chat.updated_at = message.timestamp.max(chat.updated_at);
    chat.last_message = Some(message.clone());
}

fn sort_recent_first(chats: &mut [Chat]) {
    chats.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
#[path = "directory_test.rs"]
mod tests;
