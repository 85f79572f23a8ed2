//! Connection hub — registry of live websocket clients and event fan-out.
//!
//! DESIGN
//! ======
//! Every websocket connection registers its outbound channel here. Events
//! are routed by audience rather than by room: a chat's audience is every
//! support connection plus every connection of the chat's customer, so the
//! widget and the dashboard see the same mutations.
//!
//! The hub also owns the online flag: a user is online from the first
//! registered connection until the last one is removed.
//!
//! Delivery is best-effort: a client whose channel is full is skipped
//! rather than allowed to stall the sender.

use tracing::info;
use uuid::Uuid;

use crate::frame::{Data, Frame};
use crate::services::presence;
use crate::state::{AppState, Chat, ConnectedClient, Message, SenderType};

/// Who receives a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// All support connections plus the connections of this customer.
    Chat { user_id: String },
    /// Every connection.
    Everyone,
}

impl Audience {
    #[must_use]
    pub fn for_chat(chat: &Chat) -> Self {
        Self::Chat { user_id: chat.user_id.clone() }
    }

    fn includes(&self, client: &ConnectedClient) -> bool {
        match self {
            Self::Chat { user_id } => client.role == SenderType::Admin || &client.user_id == user_id,
            Self::Everyone => true,
        }
    }
}

/// Register a connection and mark its user online. Returns true if this is
/// the user's first open connection.
///
/// The online flag is updated while the client registry is still locked,
/// so it always agrees with the set of open connections.
pub async fn register(state: &AppState, client_id: Uuid, client: ConnectedClient) -> bool {
    let mut clients = state.clients.write().await;
    let first = !clients.values().any(|c| c.user_id == client.user_id);
    info!(
        %client_id,
        user_id = %client.user_id,
        user_name = %client.user_name,
        role = client.role.as_str(),
        "client registered"
    );
    presence::set_user_online(state, &client.user_id, true).await;
    clients.insert(client_id, client);
    first
}

/// Remove a connection. Returns true if the same user still has another
/// connection open; otherwise the user is marked offline.
pub async fn unregister(state: &AppState, client_id: Uuid) -> bool {
    let mut clients = state.clients.write().await;
    let Some(removed) = clients.remove(&client_id) else {
        return false;
    };
    let still_connected = clients.values().any(|c| c.user_id == removed.user_id);
    if !still_connected {
        presence::set_user_online(state, &removed.user_id, false).await;
    }
    info!(%client_id, remaining = clients.len(), still_connected, "client unregistered");
    still_connected
}

/// Number of open connections for `user_id`.
pub async fn connection_count(state: &AppState, user_id: &str) -> usize {
    let clients = state.clients.read().await;
    clients.values().filter(|c| c.user_id == user_id).count()
}

/// Deliver `frame` to every client in `audience` except `exclude`.
/// Returns the number of clients that accepted the frame.
pub async fn broadcast(state: &AppState, audience: &Audience, frame: &Frame, exclude: Option<Uuid>) -> usize {
    let clients = state.clients.read().await;
    let mut delivered = 0;
    for (client_id, client) in clients.iter() {
        if exclude == Some(*client_id) || !audience.includes(client) {
            continue;
        }
        // Best-effort: if a client's channel is full, skip it.
        if client.tx.try_send(frame.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

// =============================================================================
// EVENT PAYLOADS
// =============================================================================

#[must_use]
pub fn chat_data(chat: &Chat) -> Data {
    let mut data = Data::new();
    data.insert("chat".into(), serde_json::to_value(chat).unwrap_or_default());
    data
}

#[must_use]
pub fn message_data(message: &Message, chat: &Chat) -> Data {
    let mut data = chat_data(chat);
    data.insert("message".into(), serde_json::to_value(message).unwrap_or_default());
    data
}

/// Announce a chat change (`chat:*` syscall) to the chat's audience.
pub async fn publish_chat(state: &AppState, syscall: &str, chat: &Chat, exclude: Option<Uuid>) {
    let frame = Frame::request(syscall, chat_data(chat)).with_chat_id(chat.id);
    broadcast(state, &Audience::for_chat(chat), &frame, exclude).await;
}

/// Announce a new message to the chat's audience.
pub async fn publish_message(state: &AppState, message: &Message, chat: &Chat, exclude: Option<Uuid>) {
    let frame = Frame::request("message:send", message_data(message, chat))
        .with_chat_id(chat.id)
        .with_from(message.sender_id.clone());
    broadcast(state, &Audience::for_chat(chat), &frame, exclude).await;
}

/// Announce a presence change to everyone.
pub async fn publish_presence(state: &AppState, user_id: &str, role: SenderType, online: bool) {
    let frame = Frame::request("presence:changed", Data::new())
        .with_data("user_id", user_id)
        .with_data("role", role.as_str())
        .with_data("online", online);
    broadcast(state, &Audience::Everyone, &frame, None).await;
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
