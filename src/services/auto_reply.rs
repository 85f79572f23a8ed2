//! Automatic reply — canned support answer after a customer message.
//!
//! DESIGN
//! ======
//! Each customer message (re)schedules one delayed task per chat. Pending
//! tasks are tracked by chat ID with a ticket number: only the task holding
//! the current ticket may fire, and replacing, cancelling, or closing the
//! chat aborts the previous task. Under the same store guard as the append,
//! the task re-reads the chat and does nothing if it has been closed or
//! support has replied in the meantime.
//!
//! The reply is appended like any support message, so it also moves a
//! waiting chat to active.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AutoReplyConfig;
use crate::services::{hub, message};
use crate::state::{AppState, ChatStatus, MessageKind, NewMessage, SenderType};

struct PendingReply {
    ticket: u64,
    handle: AbortHandle,
}

#[derive(Clone)]
pub struct AutoReplier {
    config: Arc<AutoReplyConfig>,
    pending: Arc<Mutex<HashMap<Uuid, PendingReply>>>,
    next_ticket: Arc<AtomicU64>,
}

impl AutoReplier {
    #[must_use]
    pub fn new(config: AutoReplyConfig) -> Self {
        Self {
            config: Arc::new(config),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: Arc::new(AtomicU64::new(1)),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Schedule the canned reply for `chat_id`, replacing any pending one.
    /// Returns false when automatic replies are disabled.
    pub fn schedule(&self, state: AppState, chat_id: Uuid) -> bool {
        if !self.config.enabled {
            return false;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let delay = self.config.delay;
        let replier = self.clone();

        // Hold the map lock across spawn + insert so the task cannot look up
        // its ticket before it is recorded.
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !replier.take(chat_id, ticket) {
                return;
            }
            replier.deliver(&state, chat_id).await;
        });
        if let Some(previous) = pending.insert(chat_id, PendingReply { ticket, handle: handle.abort_handle() }) {
            previous.handle.abort();
        }
        debug!(%chat_id, ticket, "auto reply scheduled");
        true
    }

    /// Abort the pending reply for `chat_id`. Returns true if one existed.
    pub fn cancel(&self, chat_id: Uuid) -> bool {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&chat_id);
        let Some(previous) = removed else {
            return false;
        };
        previous.handle.abort();
        debug!(%chat_id, "auto reply cancelled");
        true
    }

    #[cfg(test)]
    #[must_use]
    pub fn is_pending(&self, chat_id: Uuid) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&chat_id)
    }

    /// Claim the pending slot if `ticket` is still the current one.
    fn take(&self, chat_id: Uuid, ticket: u64) -> bool {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match pending.get(&chat_id) {
            Some(current) if current.ticket == ticket => {
                pending.remove(&chat_id);
                true
            }
            _ => false,
        }
    }

    /// Append the canned reply unless the chat is gone, closed, or already
    /// answered by support. The check and the append share one write guard,
    /// so a close or a human reply that lands after `take` still wins.
    async fn deliver(&self, state: &AppState, chat_id: Uuid) {
        let reply = NewMessage {
            chat_id,
            sender_id: self.config.sender_id.clone(),
            sender_name: self.config.sender_name.clone(),
            sender_type: SenderType::Admin,
            content: self.config.message.clone(),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
        };

        let appended = {
            let mut store = state.store.write().await;
            match store.chats.get(&chat_id) {
                None => {
                    warn!(%chat_id, "auto reply skipped: chat not found");
                    return;
                }
                Some(chat) if chat.status == ChatStatus::Closed => {
                    debug!(%chat_id, "auto reply skipped: chat closed");
                    return;
                }
                Some(chat) if chat.last_message.as_ref().is_some_and(|m| m.sender_type == SenderType::Admin) => {
                    debug!(%chat_id, "auto reply skipped: support already replied");
                    return;
                }
                Some(_) => {}
            }
            message::append_locked(&mut store, reply)
        };

        match appended {
            Ok((message, chat)) => {
                message::record_added(state, &message);
                info!(%chat_id, message_id = %message.id, "auto reply sent");
                hub::publish_message(state, &message, &chat, None).await;
            }
            Err(e) => warn!(%chat_id, error = %e, "auto reply failed"),
        }
    }
}

#[cfg(test)]
#[path = "auto_reply_test.rs"]
mod tests;
