//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the admin REST API and the websocket endpoint shared
//! by the customer widget and the admin dashboard under one Axum router.

pub mod auth;
pub mod chats;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/api/chats/unread", get(chats::unread_chats))
        .route("/api/chats/{id}", get(chats::get_chat).patch(chats::update_chat))
        .route("/api/chats/{id}/read", post(chats::mark_read))
        .route(
            "/api/chats/{id}/messages",
            get(chats::list_messages).post(chats::send_message),
        )
        .route("/api/presence", get(chats::presence))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
