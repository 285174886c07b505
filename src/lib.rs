//! botmand: a chat-bot multiplexer.
//!
//! Incoming chat messages are matched against declaratively configured
//! triggers; each match launches the configured handler as a child process
//! and binds it to the originating thread or channel as a conversation.
//! Lines flow between the handler's stdio and the chat backend for the
//! lifetime of the conversation.

pub mod backend;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics;

pub use error::{Error, Result};
pub use message::Message;

/// Bot identity: prefixes handler environment variables and metric names,
/// and names the default config directory.
pub const BOT_NAME: &str = "botmand";

/// URL-like scheme handlers embed in their output to address the manager.
pub const COMMAND_SCHEME: &str = "botmand://";

/// Capacity of the per-engine stdin/stdout queues.
pub const ENGINE_QUEUE_SIZE: usize = 10;

/// Capacity of the backend ingress/egress queues.
pub const BACKEND_QUEUE_SIZE: usize = 100;
