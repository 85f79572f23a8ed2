//! In-memory rate limiting for message sends.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `HashMap<Uuid, VecDeque<Instant>>`.
//! Two limits are enforced on `message:send`:
//! - Per-client: 30 messages/min by default
//! - Global: 600 messages/min by default
//!
//! Empty per-client windows are dropped on prune so disconnected clients
//! do not accumulate entries.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

const DEFAULT_PER_CLIENT_LIMIT: usize = 30;
const DEFAULT_GLOBAL_LIMIT: usize = 600;
const DEFAULT_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub per_client_limit: usize,
    pub global_limit: usize,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_client_limit: DEFAULT_PER_CLIENT_LIMIT,
            global_limit: DEFAULT_GLOBAL_LIMIT,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read limits through `lookup`; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let window_secs = lookup_parse(&lookup, "RATE_LIMIT_MESSAGES_WINDOW_SECS", DEFAULT_WINDOW_SECS);
        Self {
            per_client_limit: lookup_parse(&lookup, "RATE_LIMIT_MESSAGES_PER_CLIENT", DEFAULT_PER_CLIENT_LIMIT),
            global_limit: lookup_parse(&lookup, "RATE_LIMIT_MESSAGES_GLOBAL", DEFAULT_GLOBAL_LIMIT),
            window: Duration::from_secs(window_secs),
        }
    }
}

fn lookup_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum RateLimitError {
    #[error("per-client rate limit exceeded (max {limit} messages/{window_secs}s)")]
    PerClientExceeded { limit: usize, window_secs: u64 },
    #[error("global rate limit exceeded (max {limit} messages/{window_secs}s)")]
    GlobalExceeded { limit: usize, window_secs: u64 },
}

impl crate::frame::ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        "E_RATE_LIMITED"
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
    config: RateLimitConfig,
}

struct RateLimiterInner {
    /// Per-client send timestamps.
    client_requests: HashMap<Uuid, VecDeque<Instant>>,
    /// Global send timestamps.
    global_requests: VecDeque<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::from_env())
    }

    #[must_use]
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                client_requests: HashMap::new(),
                global_requests: VecDeque::new(),
            })),
            config,
        }
    }

    /// Check both per-client and global limits, then record the send.
    ///
    /// # Errors
    ///
    /// Returns the first limit that would be exceeded; nothing is recorded.
    pub fn check_and_record(&self, client_id: Uuid) -> Result<(), RateLimitError> {
        self.check_and_record_at(client_id, Instant::now())
    }

    /// Internal: check + record with explicit timestamp (for testing).
    fn check_and_record_at(&self, client_id: Uuid, now: Instant) -> Result<(), RateLimitError> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let cfg = self.config;

        prune_window(&mut inner.global_requests, now, cfg.window);
        if inner.global_requests.len() >= cfg.global_limit {
            return Err(RateLimitError::GlobalExceeded { limit: cfg.global_limit, window_secs: cfg.window.as_secs() });
        }

        let client_deque = inner.client_requests.entry(client_id).or_default();
        prune_window(client_deque, now, cfg.window);
        if client_deque.len() >= cfg.per_client_limit {
            return Err(RateLimitError::PerClientExceeded {
                limit: cfg.per_client_limit,
                window_secs: cfg.window.as_secs(),
            });
        }

        client_deque.push_back(now);
        inner.global_requests.push_back(now);

        Ok(())
    }

    /// Forget a client's window, e.g. when its connection closes.
    pub fn forget(&self, client_id: Uuid) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.client_requests.remove(&client_id);
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .client_requests
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = deque.front() {
        if now.duration_since(front) > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
