//! Analytics service — bounded event queue with an owned flush task.
//!
//! DESIGN
//! ======
//! `Analytics` is constructed once by `AppState::new` and injected wherever
//! events are recorded; there is no global instance. Recording is a cheap
//! push under a mutex. Flushing is driven by `spawn_flush_task`, which the
//! host starts and stops explicitly: it ticks on a fixed interval, drains
//! the queue, emits one structured log line per flush, and performs a final
//! flush when the shutdown signal fires.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::now_ms;
use crate::state::{ChatStatus, SenderType};

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    ChatOpened { chat_id: Uuid, user_id: String },
    MessageSent { chat_id: Uuid, sender_type: SenderType },
    ChatRead { chat_id: Uuid, reader: SenderType },
    StatusChanged { chat_id: Uuid, status: ChatStatus },
}

impl AnalyticsEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatOpened { .. } => "chat_opened",
            Self::MessageSent { .. } => "message_sent",
            Self::ChatRead { .. } => "chat_read",
            Self::StatusChanged { .. } => "status_changed",
        }
    }
}

/// An event plus the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedEvent {
    pub ts: i64,
    #[serde(flatten)]
    pub event: AnalyticsEvent,
}

// =============================================================================
// SERVICE
// =============================================================================

#[derive(Clone)]
pub struct Analytics {
    queue: Arc<Mutex<VecDeque<TrackedEvent>>>,
    max_queue: usize,
}

impl Analytics {
    #[must_use]
    pub fn new(max_queue: usize) -> Self {
        Self { queue: Arc::new(Mutex::new(VecDeque::new())), max_queue: max_queue.max(1) }
    }

    /// Record an event. When the queue is full the oldest event is dropped.
    pub fn track(&self, event: AnalyticsEvent) {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if queue.len() >= self.max_queue {
            if let Some(dropped) = queue.pop_front() {
                warn!(event = dropped.event.name(), "analytics: queue full, dropping oldest event");
            }
        }
        debug!(event = event.name(), "analytics: tracked");
        queue.push_back(TrackedEvent { ts: now_ms(), event });
    }

    /// Number of events waiting for the next flush.
    #[cfg(test)]
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Drain the queue and log a per-event-name summary.
    pub fn flush(&self) -> Vec<TrackedEvent> {
        let drained: Vec<TrackedEvent> = {
            let mut queue = self
                .queue
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            queue.drain(..).collect()
        };

        if drained.is_empty() {
            return drained;
        }

        let summary = summarize(&drained);
        let summary = serde_json::to_string(&summary).unwrap_or_default();
        info!(count = drained.len(), %summary, "analytics: flushed");
        drained
    }
}

/// Count events by name.
#[must_use]
pub fn summarize(events: &[TrackedEvent]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for tracked in events {
        *counts.entry(tracked.event.name()).or_insert(0) += 1;
    }
    counts
}

// =============================================================================
// FLUSH TASK
// =============================================================================

/// Spawn the periodic flush task. Send `true` on the shutdown channel (or
/// drop the sender) to stop it; a final flush runs before the task exits.
pub fn spawn_flush_task(analytics: Analytics, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    analytics.flush();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        analytics.flush();
        info!("analytics: flush task stopped");
    })
}

#[cfg(test)]
#[path = "analytics_test.rs"]
mod tests;
