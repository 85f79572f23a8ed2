//! Server configuration parsed from environment variables.
//!
//! Every value has a default except the admin token, which is generated
//! at startup when `ADMIN_TOKEN` is unset. Parsing goes through a lookup
//! closure so tests can supply values without touching the process env.

use std::time::Duration;

use crate::services::session;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_AUTO_REPLY_DELAY_MS: u64 = 2000;
pub const DEFAULT_AUTO_REPLY_SENDER_ID: &str = "support_bot";
pub const DEFAULT_AUTO_REPLY_SENDER_NAME: &str = "SHAREINFO Support";
pub const DEFAULT_AUTO_REPLY_MESSAGE: &str =
    "Thanks for reaching out! A member of our team will reply shortly.";
pub const DEFAULT_ANALYTICS_FLUSH_SECS: u64 = 30;
pub const DEFAULT_ANALYTICS_MAX_QUEUE: usize = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{key} must not be empty")]
    Empty { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoReplyConfig {
    pub enabled: bool,
    pub delay: Duration,
    pub sender_id: String,
    pub sender_name: String,
    pub message: String,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: Duration::from_millis(DEFAULT_AUTO_REPLY_DELAY_MS),
            sender_id: DEFAULT_AUTO_REPLY_SENDER_ID.into(),
            sender_name: DEFAULT_AUTO_REPLY_SENDER_NAME.into(),
            message: DEFAULT_AUTO_REPLY_MESSAGE.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsConfig {
    pub flush_interval: Duration,
    pub max_queue: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(DEFAULT_ANALYTICS_FLUSH_SECS),
            max_queue: DEFAULT_ANALYTICS_MAX_QUEUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Bearer token for the admin REST API and admin websocket sessions.
    pub admin_token: String,
    /// True when `admin_token` was generated because none was configured.
    pub admin_token_generated: bool,
    pub client_channel_capacity: usize,
    pub auto_reply: AutoReplyConfig,
    pub analytics: AnalyticsConfig,
}

impl ServerConfig {
    /// Build typed config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `ADMIN_TOKEN`: random 64-char hex token when absent
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    /// - `AUTO_REPLY_ENABLED`: default false
    /// - `AUTO_REPLY_DELAY_MS`: default 2000
    /// - `AUTO_REPLY_SENDER_ID` / `AUTO_REPLY_SENDER_NAME` / `AUTO_REPLY_MESSAGE`
    /// - `ANALYTICS_FLUSH_SECS`: default 30
    /// - `ANALYTICS_MAX_QUEUE`: default 1000
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` when a present variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` when a present variable does not parse, or
    /// `Empty` when a text setting is present but blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let (admin_token, admin_token_generated) = match lookup("ADMIN_TOKEN") {
            Some(token) if token.trim().is_empty() => return Err(ConfigError::Empty { key: "ADMIN_TOKEN" }),
            Some(token) => (token.trim().to_string(), false),
            None => (session::generate_token(), true),
        };

        let client_channel_capacity = parse_or(&lookup, "CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY)?;
        if client_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue { key: "CLIENT_CHANNEL_CAPACITY", value: "0".into() });
        }

        let auto_reply = AutoReplyConfig {
            enabled: parse_bool(&lookup, "AUTO_REPLY_ENABLED", false)?,
            delay: Duration::from_millis(parse_or(&lookup, "AUTO_REPLY_DELAY_MS", DEFAULT_AUTO_REPLY_DELAY_MS)?),
            sender_id: text_or(&lookup, "AUTO_REPLY_SENDER_ID", DEFAULT_AUTO_REPLY_SENDER_ID)?,
            sender_name: text_or(&lookup, "AUTO_REPLY_SENDER_NAME", DEFAULT_AUTO_REPLY_SENDER_NAME)?,
            message: text_or(&lookup, "AUTO_REPLY_MESSAGE", DEFAULT_AUTO_REPLY_MESSAGE)?,
        };

        let analytics = AnalyticsConfig {
            flush_interval: Duration::from_secs(parse_or(&lookup, "ANALYTICS_FLUSH_SECS", DEFAULT_ANALYTICS_FLUSH_SECS)?),
            max_queue: parse_or(&lookup, "ANALYTICS_MAX_QUEUE", DEFAULT_ANALYTICS_MAX_QUEUE)?,
        };
        if analytics.flush_interval.is_zero() {
            return Err(ConfigError::InvalidValue { key: "ANALYTICS_FLUSH_SECS", value: "0".into() });
        }

        Ok(Self { port, admin_token, admin_token_generated, client_channel_capacity, auto_reply, analytics })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value: raw }),
    }
}

fn text_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    match lookup(key) {
        None => Ok(default.to_string()),
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::Empty { key }),
        Some(raw) => Ok(raw.trim().to_string()),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
