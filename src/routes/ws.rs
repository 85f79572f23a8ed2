//! WebSocket handler — bidirectional frame relay for widget and dashboard.
//!
//! DESIGN
//! ======
//! On upgrade, registers the connection with the hub and enters a `select!`
//! loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames fanned out by the hub → forward to client
//!
//! Handler functions are pure business logic: they validate, mutate state,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns:
//! reply to sender and broadcast to the chat's audience.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register, send `session:connected`, broadcast `presence:changed`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / broadcast / both)
//! 4. Close → clear typing flags → unregister → offline once the user's
//!    last connection is gone

use std::collections::{HashMap, HashSet};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services::hub::{self, Audience};
use crate::services::{directory, message, presence, session};
use crate::state::{AppState, Chat, ChatPatch, ChatStatus, ConnectedClient, MessageKind, NewChat, NewMessage, SenderType};

// =============================================================================
// SESSION
// =============================================================================

/// Per-connection identity and the presence it owns.
pub(crate) struct Session {
    pub client_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub role: SenderType,
    /// Chats whose typing flag this connection raised.
    pub typing: HashSet<Uuid>,
}

impl Session {
    pub(crate) fn new(user_id: impl Into<String>, user_name: impl Into<String>, role: SenderType) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_email: String::new(),
            role,
            typing: HashSet::new(),
        }
    }

    fn is_admin(&self) -> bool {
        self.role == SenderType::Admin
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Event fanned out to a chat's audience. The sender is always excluded;
/// it learns the result from its own reply.
struct Fanout {
    audience: Audience,
    chat_id: Uuid,
    data: Data,
}

impl Fanout {
    fn chat(chat: &Chat, data: Data) -> Self {
        Self { audience: Audience::for_chat(chat), chat_id: chat.id, data }
    }
}

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what. Handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender and the same data to the audience.
    Broadcast(Fanout),
    /// Send data to the audience only. No reply to sender.
    BroadcastExcludeSender(Fanout),
    /// Send done+data to sender only.
    Reply(Data),
    /// Reply to sender with one payload, broadcast different data to peers.
    ReplyAndBroadcast { reply: Data, broadcast: Fanout },
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match session_from_params(&state, &params) {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };
    ws.on_upgrade(move |socket| run_ws(socket, state, session))
}

/// Validate connect parameters. Customers are identified by the `user_id`
/// they present; support must also present the admin token.
fn session_from_params(state: &AppState, params: &HashMap<String, String>) -> Result<Session, (StatusCode, &'static str)> {
    let user_id = params
        .get("user_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "user_id required"))?;

    let role = match params.get("role").map(String::as_str) {
        None | Some("" | "user") => SenderType::User,
        Some("admin") => SenderType::Admin,
        Some(_) => return Err((StatusCode::BAD_REQUEST, "invalid role")),
    };

    if role == SenderType::Admin {
        let token = params.get("token").map_or("", String::as_str);
        if !session::token_matches(&state.config.admin_token, token) {
            return Err((StatusCode::UNAUTHORIZED, "invalid admin token"));
        }
    }

    let name = params
        .get("name")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(user_id);
    let mut session = Session::new(user_id, name, role);
    if let Some(email) = params.get("email") {
        session.user_email = email.trim().to_string();
    }
    Ok(session)
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, mut session: Session) {
    let client_id = session.client_id;

    // Per-connection channel for receiving frames fanned out by the hub.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    hub::register(
        &state,
        client_id,
        ConnectedClient {
            user_id: session.user_id.clone(),
            user_name: session.user_name.clone(),
            role: session.role,
            tx: client_tx,
        },
    )
    .await;

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", client_id.to_string())
        .with_data("user_id", session.user_id.clone())
        .with_data("role", session.role.as_str());
    if send_frame(&mut socket, &welcome).await.is_ok() {
        hub::publish_presence(&state, &session.user_id, session.role, true).await;
        let connections = hub::connection_count(&state, &session.user_id).await;
        info!(%client_id, user_id = %session.user_id, role = session.role.as_str(), connections, "ws: client connected");

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(msg) = msg else { break };
                    match msg {
                        WsMessage::Text(text) => {
                            let replies = process_inbound_text(&state, &mut session, &text).await;
                            for frame in replies {
                                let _ = send_frame(&mut socket, &frame).await;
                            }
                        }
                        WsMessage::Close(_) => break,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    disconnect(&state, &mut session).await;
}

/// Release everything a connection owns. The hub marks the user offline
/// when this was their last connection.
pub(crate) async fn disconnect(state: &AppState, session: &mut Session) {
    for chat_id in std::mem::take(&mut session.typing) {
        if !presence::set_typing(state, chat_id, false).await {
            continue;
        }
        if let Ok(chat) = directory::get_chat(state, chat_id).await {
            let frame = typing_frame(chat_id, false, &session.user_id);
            hub::broadcast(state, &Audience::for_chat(&chat), &frame, Some(session.client_id)).await;
        }
    }

    let still_connected = hub::unregister(state, session.client_id).await;
    state.rate_limiter.forget(session.client_id);
    if !still_connected {
        hub::publish_presence(state, &session.user_id, session.role, false).await;
    }
    info!(client_id = %session.client_id, user_id = %session.user_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
///
/// This keeps the websocket transport concerns separate from frame handling,
/// so tests can exercise dispatch and fan-out without a socket.
pub(crate) async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection's identity as `from`.
    req.from = Some(session.user_id.clone());

    let prefix = req.prefix();
    let is_typing = req.syscall == "presence:typing";
    if !is_typing {
        info!(client_id = %session.client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match prefix {
        "chat" => handle_chat(state, session, &req).await,
        "message" => handle_message(state, session, &req).await,
        "presence" => handle_presence(state, session, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    // Apply outcome; the dispatch layer owns all outbound logic.
    let exclude = Some(session.client_id);
    match result {
        Ok(Outcome::Broadcast(fanout)) => {
            let sender_frame = req.done_with(fanout.data.clone());
            let peer_frame = Frame::request(&req.syscall, fanout.data)
                .with_chat_id(fanout.chat_id)
                .with_from(session.user_id.clone());
            hub::broadcast(state, &fanout.audience, &peer_frame, exclude).await;
            vec![sender_frame]
        }
        Ok(Outcome::BroadcastExcludeSender(fanout)) => {
            let frame = Frame::request(&req.syscall, fanout.data)
                .with_chat_id(fanout.chat_id)
                .with_from(session.user_id.clone());
            hub::broadcast(state, &fanout.audience, &frame, exclude).await;
            vec![]
        }
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            let sender_frame = req.done_with(reply);
            let notif = Frame::request(&req.syscall, broadcast.data)
                .with_chat_id(broadcast.chat_id)
                .with_from(session.user_id.clone());
            hub::broadcast(state, &broadcast.audience, &notif, exclude).await;
            vec![sender_frame]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "open" => {
            if session.is_admin() {
                return Err(req.error("chat:open is for customers"));
            }
            let new_chat = NewChat {
                user_name: req
                    .data_str("user_name")
                    .map_or_else(|| session.user_name.clone(), str::to_string),
                user_email: req
                    .data_str("user_email")
                    .map_or_else(|| session.user_email.clone(), str::to_string),
                ..NewChat::for_user(session.user_id.clone())
            };
            let (chat, created) = directory::open_chat_for_user(state, new_chat).await;
            let messages = message::get_chat_messages(state, chat.id).await;

            let mut reply = hub::chat_data(&chat);
            reply.insert("messages".into(), serde_json::to_value(&messages).unwrap_or_default());
            reply.insert("created".into(), json!(created));

            if created {
                Ok(Outcome::ReplyAndBroadcast { reply, broadcast: Fanout::chat(&chat, hub::chat_data(&chat)) })
            } else {
                Ok(Outcome::Reply(reply))
            }
        }
        "list" => {
            require_admin(session, req)?;
            let status = match req.data_str("status") {
                None | Some("") => None,
                Some(raw) => Some(ChatStatus::parse(raw).ok_or_else(|| req.error(format!("invalid status: {raw}")))?),
            };
            let chats = directory::list_chats(state, status).await;
            Ok(Outcome::Reply(chats_data(&chats)))
        }
        "unread" => {
            require_admin(session, req)?;
            let chats = directory::get_unread_chats(state).await;
            Ok(Outcome::Reply(chats_data(&chats)))
        }
        "get" => {
            let chat = resolve_chat(state, session, req).await?;
            let mut data = hub::chat_data(&chat);
            data.insert("typing".into(), json!(presence::is_typing(state, chat.id).await));
            Ok(Outcome::Reply(data))
        }
        "update" => {
            require_admin(session, req)?;
            let chat_id = require_chat_id(req)?;
            let patch: ChatPatch = serde_json::to_value(&req.data)
                .and_then(serde_json::from_value)
                .map_err(|e| req.error(format!("invalid patch: {e}")))?;
            let chat = directory::update_chat(state, chat_id, &patch)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast(Fanout::chat(&chat, hub::chat_data(&chat))))
        }
        "read" => {
            let chat = resolve_chat(state, session, req).await?;
            let chat = directory::mark_chat_as_read(state, chat.id, session.role)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Broadcast(Fanout::chat(&chat, hub::chat_data(&chat))))
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// MESSAGE HANDLERS
// =============================================================================

async fn handle_message(state: &AppState, session: &Session, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "send" => {
            let chat = resolve_chat(state, session, req).await?;
            let kind = match req.data.get("type") {
                None | Some(Value::Null) => MessageKind::default(),
                Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| req.error(format!("invalid message type: {raw}")))?,
            };
            let new_message = NewMessage {
                chat_id: chat.id,
                sender_id: session.user_id.clone(),
                sender_name: session.user_name.clone(),
                sender_type: session.role,
                content: req.data_str("content").unwrap_or_default().to_string(),
                kind,
                file_url: req.data_str("file_url").map(str::to_string),
                file_name: req.data_str("file_name").map(str::to_string),
            };
            // Only well-formed sends count against the rate limit.
            message::validate(&new_message).map_err(|e| req.error_from(&e))?;
            state
                .rate_limiter
                .check_and_record(session.client_id)
                .map_err(|e| req.error_from(&e))?;

            let (message, chat) = message::add_message(state, new_message)
                .await
                .map_err(|e| req.error_from(&e))?;

            match session.role {
                SenderType::User => {
                    state.auto_reply.schedule(state.clone(), chat.id);
                }
                SenderType::Admin => {
                    state.auto_reply.cancel(chat.id);
                }
            }
            Ok(Outcome::Broadcast(Fanout::chat(&chat, hub::message_data(&message, &chat))))
        }
        "list" => {
            let chat = resolve_chat(state, session, req).await?;
            let messages = message::get_chat_messages(state, chat.id).await;
            let mut data = Data::new();
            data.insert("messages".into(), serde_json::to_value(&messages).unwrap_or_default());
            Ok(Outcome::Reply(data))
        }
        op => Err(req.error(format!("unknown message op: {op}"))),
    }
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_presence(state: &AppState, session: &mut Session, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "online" => {
            let mut data = Data::new();
            if let Some(user_id) = req.data_str("user_id") {
                data.insert("user_id".into(), json!(user_id));
                data.insert("online".into(), json!(presence::is_user_online(state, user_id).await));
            } else {
                data.insert("users".into(), json!(presence::online_users(state).await));
            }
            Ok(Outcome::Reply(data))
        }
        "typing" => {
            let chat = resolve_chat(state, session, req).await?;
            let typing = req
                .data
                .get("typing")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            presence::set_typing(state, chat.id, typing).await;
            if typing {
                session.typing.insert(chat.id);
            } else {
                session.typing.remove(&chat.id);
            }

            let frame = typing_frame(chat.id, typing, &session.user_id);
            Ok(Outcome::BroadcastExcludeSender(Fanout::chat(&chat, frame.data)))
        }
        op => Err(req.error(format!("unknown presence op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn require_admin(session: &Session, req: &Frame) -> Result<(), Frame> {
    if session.is_admin() {
        return Ok(());
    }
    Err(req.error(format!("{} requires support access", req.syscall)))
}

fn require_chat_id(req: &Frame) -> Result<Uuid, Frame> {
    req.target_chat().ok_or_else(|| req.error("chat_id required"))
}

/// Look up the frame's target chat, enforcing customer ownership.
async fn resolve_chat(state: &AppState, session: &Session, req: &Frame) -> Result<Chat, Frame> {
    let chat_id = require_chat_id(req)?;
    directory::get_chat_for(state, chat_id, &session.user_id, session.role)
        .await
        .map_err(|e| req.error_from(&e))
}

fn chats_data(chats: &[Chat]) -> Data {
    let mut data = Data::new();
    data.insert("chats".into(), serde_json::to_value(chats).unwrap_or_default());
    data
}

fn typing_frame(chat_id: Uuid, typing: bool, user_id: &str) -> Frame {
    Frame::request("presence:typing", Data::new())
        .with_chat_id(chat_id)
        .with_data("chat_id", chat_id.to_string())
        .with_data("typing", typing)
        .with_data("user_id", user_id)
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data_str("code").unwrap_or("-");
        let message = frame.data_str("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall != "presence:typing" {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
