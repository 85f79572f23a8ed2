//! Admin dashboard REST routes.
//!
//! Every mutation here is also pushed to connected websocket clients, so a
//! customer widget sees dashboard replies exactly like websocket replies.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::auth::{AdminAuth, REST_ADMIN_ID};
use crate::services::directory::{self, ChatError};
use crate::services::{hub, message, presence};
use crate::state::{AppState, Chat, ChatPatch, ChatStatus, Message, MessageKind, NewChat, NewMessage, SenderType};

#[derive(Deserialize)]
pub struct ListChatsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
}

#[derive(Serialize)]
pub struct PresenceResponse {
    pub users: Vec<String>,
}

pub(crate) fn chat_error_to_status(err: ChatError) -> StatusCode {
    match err {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
        ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
    }
}

fn parse_status_filter(raw: Option<&str>) -> Result<Option<ChatStatus>, StatusCode> {
    match raw {
        None | Some("") => Ok(None),
        Some(s) => ChatStatus::parse(s).map(Some).ok_or(StatusCode::BAD_REQUEST),
    }
}

/// `GET /api/chats?status=`: list chats, most recently updated first.
pub async fn list_chats(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Query(query): Query<ListChatsQuery>,
) -> Result<Json<Vec<Chat>>, StatusCode> {
    let status = parse_status_filter(query.status.as_deref())?;
    Ok(Json(directory::list_chats(&state, status).await))
}

/// `POST /api/chats`: create a chat on behalf of a customer.
pub async fn create_chat(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(body): Json<NewChat>,
) -> Result<(StatusCode, Json<Chat>), StatusCode> {
    if body.user_id.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let chat = directory::add_chat(&state, body).await;
    hub::publish_chat(&state, "chat:open", &chat, None).await;
    Ok((StatusCode::CREATED, Json(chat)))
}

/// `GET /api/chats/unread`: chats with unread customer messages.
pub async fn unread_chats(State(state): State<AppState>, _auth: AdminAuth) -> Json<Vec<Chat>> {
    Json(directory::get_unread_chats(&state).await)
}

/// `GET /api/chats/:id`
pub async fn get_chat(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Chat>, StatusCode> {
    directory::get_chat(&state, chat_id)
        .await
        .map(Json)
        .map_err(chat_error_to_status)
}

/// `PATCH /api/chats/:id`: shallow-merge status, priority, tags, identity.
pub async fn update_chat(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(chat_id): Path<Uuid>,
    Json(patch): Json<ChatPatch>,
) -> Result<Json<Chat>, StatusCode> {
    let chat = directory::update_chat(&state, chat_id, &patch)
        .await
        .map_err(chat_error_to_status)?;
    hub::publish_chat(&state, "chat:update", &chat, None).await;
    Ok(Json(chat))
}

/// `POST /api/chats/:id/read`: support has read the chat.
pub async fn mark_read(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Chat>, StatusCode> {
    let chat = directory::mark_chat_as_read(&state, chat_id, SenderType::Admin)
        .await
        .map_err(chat_error_to_status)?;
    hub::publish_chat(&state, "chat:read", &chat, None).await;
    Ok(Json(chat))
}

/// `GET /api/chats/:id/messages`: the chat log in creation order.
pub async fn list_messages(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(chat_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    directory::get_chat(&state, chat_id)
        .await
        .map_err(chat_error_to_status)?;
    Ok(Json(message::get_chat_messages(&state, chat_id).await))
}

/// `POST /api/chats/:id/messages`: reply as support.
pub async fn send_message(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<SendMessageBody>,
) -> Result<(StatusCode, Json<Message>), StatusCode> {
    let new_message = NewMessage {
        chat_id,
        sender_id: REST_ADMIN_ID.into(),
        sender_name: body.sender_name.unwrap_or_else(|| "Support".into()),
        sender_type: SenderType::Admin,
        content: body.content,
        kind: body.kind,
        file_url: body.file_url,
        file_name: body.file_name,
    };
    let (message, chat) = message::add_message(&state, new_message)
        .await
        .map_err(chat_error_to_status)?;

    // A human answered; drop the canned reply.
    state.auto_reply.cancel(chat_id);
    hub::publish_message(&state, &message, &chat, None).await;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/presence`: online user IDs.
pub async fn presence(State(state): State<AppState>, _auth: AdminAuth) -> Json<PresenceResponse> {
    Json(PresenceResponse { users: presence::online_users(&state).await })
}

#[cfg(test)]
#[path = "chats_test.rs"]
mod tests;
