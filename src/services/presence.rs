//! Presence service — online users and per-chat typing flags.
//!
//! DESIGN
//! ======
//! Presence is transient and never persisted. The store keeps plain sets.
//! The hub drives the online set from its connection registry, and each
//! websocket connection clears the typing flags it raised when it closes.

use uuid::Uuid;

use crate::state::AppState;

/// Add or remove a user from the online set. Returns true if the set changed.
pub async fn set_user_online(state: &AppState, user_id: &str, is_online: bool) -> bool {
    let mut store = state.store.write().await;
    if is_online {
        store.online.insert(user_id.to_string())
    } else {
        store.online.remove(user_id)
    }
}

pub async fn is_user_online(state: &AppState, user_id: &str) -> bool {
    state.store.read().await.online.contains(user_id)
}

/// Online user IDs, sorted.
pub async fn online_users(state: &AppState) -> Vec<String> {
    let store = state.store.read().await;
    let mut users: Vec<String> = store.online.iter().cloned().collect();
    users.sort();
    users
}

/// Raise or clear the typing flag of a chat. Returns true if it changed.
pub async fn set_typing(state: &AppState, chat_id: Uuid, is_typing: bool) -> bool {
    let mut store = state.store.write().await;
    if is_typing {
        store.typing.insert(chat_id)
    } else {
        store.typing.remove(&chat_id)
    }
}

pub async fn is_typing(state: &AppState, chat_id: Uuid) -> bool {
    state.store.read().await.typing.contains(&chat_id)
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
