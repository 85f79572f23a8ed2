//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the chat store semantics so route handlers can stay
//! focused on protocol translation, authorization, and fan-out.

pub mod analytics;
pub mod auto_reply;
pub mod directory;
pub mod hub;
pub mod message;
pub mod presence;
pub mod session;
