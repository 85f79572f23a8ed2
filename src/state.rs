//! Shared application state and the chat data model.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It owns the chat store (directory, message logs, presence), the
//! registry of connected websocket clients, and the injected background
//! services. Nothing here is process-global: tests build as many
//! independent states as they like.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::frame::Frame;
use crate::rate_limit::RateLimiter;
use crate::services::analytics::Analytics;
use crate::services::auto_reply::AutoReplier;

// =============================================================================
// ENUMS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Active,
    Waiting,
    Closed,
}

impl ChatStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Closed => "closed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "waiting" => Some(Self::Waiting),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Which side of the conversation a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Admin,
}

impl SenderType {
    /// The party on the receiving end of a message sent by `self`.
    #[must_use]
    pub fn recipient(self) -> Self {
        match self {
            Self::User => Self::Admin,
            Self::Admin => Self::User,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

// =============================================================================
// MESSAGE
// =============================================================================

/// One chat message. Immutable once appended to a chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_type: SenderType,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
}

/// Caller-supplied fields for a new message. Id, status and timestamp are
/// assigned by the message store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub chat_id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_type: SenderType,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

// =============================================================================
// CHAT
// =============================================================================

/// One support conversation between a customer and the support team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub status: ChatStatus,
    pub priority: ChatPriority,
    /// Customer messages support has not read yet.
    pub unread_count: u32,
    /// Support messages the customer has not read yet.
    pub user_unread_count: u32,
    pub last_message: Option<Message>,
    pub created_at: i64,
    pub updated_at: i64,
    pub tags: BTreeSet<String>,
}

impl Chat {
    /// Unread counter belonging to `reader`.
    #[must_use]
    pub fn unread_for(&self, reader: SenderType) -> u32 {
        match reader {
            SenderType::Admin => self.unread_count,
            SenderType::User => self.user_unread_count,
        }
    }
}

/// Caller-supplied fields for a new chat.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewChat {
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_email: String,
    #[serde(default)]
    pub status: Option<ChatStatus>,
    #[serde(default)]
    pub priority: Option<ChatPriority>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl NewChat {
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), ..Self::default() }
    }
}

/// Shallow patch applied by `update_chat`. Absent fields are left as-is.
/// Unread counters are not patchable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatPatch {
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub status: Option<ChatStatus>,
    #[serde(default)]
    pub priority: Option<ChatPriority>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
}

// =============================================================================
// CHAT STORE
// =============================================================================

/// In-memory chat state. Lives for the process lifetime; nothing persists.
#[derive(Debug, Default)]
pub struct ChatStore {
    /// Chat directory keyed by chat ID.
    pub chats: HashMap<Uuid, Chat>,
    /// Append-only message logs keyed by chat ID.
    pub messages: HashMap<Uuid, Vec<Message>>,
    /// User IDs currently online.
    pub online: HashSet<String>,
    /// Chat IDs with a typing indicator raised.
    pub typing: HashSet<Uuid>,
}

impl ChatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// CONNECTED CLIENTS
// =============================================================================

/// One live websocket connection.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub user_id: String,
    pub user_name: String,
    pub role: SenderType,
    pub tx: mpsc::Sender<Frame>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<RwLock<ChatStore>>,
    /// Connected websocket clients keyed by `client_id`.
    pub clients: Arc<RwLock<HashMap<Uuid, ConnectedClient>>>,
    /// Sliding-window limiter for message sends.
    pub rate_limiter: RateLimiter,
    pub analytics: Analytics,
    pub auto_reply: AutoReplier,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig, rate_limiter: RateLimiter) -> Self {
        let analytics = Analytics::new(config.analytics.max_queue);
        let auto_reply = AutoReplier::new(config.auto_reply.clone());
        Self {
            config: Arc::new(config),
            store: Arc::new(RwLock::new(ChatStore::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            rate_limiter,
            analytics,
            auto_reply,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::config::{AnalyticsConfig, AutoReplyConfig};
    use crate::rate_limit::RateLimitConfig;

    pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

    /// Config with a fixed admin token and auto reply disabled.
    #[must_use]
    pub fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            admin_token: TEST_ADMIN_TOKEN.into(),
            admin_token_generated: false,
            client_channel_capacity: 64,
            auto_reply: AutoReplyConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }

    /// Create a test `AppState` with generous rate limits.
    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(test_config(), RateLimiter::with_config(RateLimitConfig::default()))
    }

    /// Create a test `AppState` with the given auto reply settings.
    #[must_use]
    pub fn test_app_state_with_auto_reply(auto_reply: AutoReplyConfig) -> AppState {
        let config = ServerConfig { auto_reply, ..test_config() };
        AppState::new(config, RateLimiter::with_config(RateLimitConfig::default()))
    }

    /// Seed a chat for `user_id` directly into the store and return its ID.
    pub async fn seed_chat(state: &AppState, user_id: &str) -> Uuid {
        let chat = dummy_chat(user_id);
        let id = chat.id;
        let mut store = state.store.write().await;
        store.chats.insert(id, chat);
        id
    }

    /// Create a dummy `Chat` for testing.
    #[must_use]
    pub fn dummy_chat(user_id: &str) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            user_name: format!("{user_id} name"),
            user_email: format!("{user_id}@example.com"),
            status: ChatStatus::Waiting,
            priority: ChatPriority::Medium,
            unread_count: 0,
            user_unread_count: 0,
            last_message: None,
            created_at: 1,
            updated_at: 1,
            tags: BTreeSet::new(),
        }
    }

    /// A text message from the customer side.
    #[must_use]
    pub fn user_text(chat_id: Uuid, user_id: &str, content: &str) -> NewMessage {
        NewMessage {
            chat_id,
            sender_id: user_id.into(),
            sender_name: format!("{user_id} name"),
            sender_type: SenderType::User,
            content: content.into(),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
        }
    }

    /// A text message from the support side.
    #[must_use]
    pub fn admin_text(chat_id: Uuid, admin_id: &str, content: &str) -> NewMessage {
        NewMessage {
            sender_id: admin_id.into(),
            sender_name: "Support".into(),
            sender_type: SenderType::Admin,
            ..user_text(chat_id, admin_id, content)
        }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
