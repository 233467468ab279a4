//! Shared types for the chat client.
//!
//! Message shapes, the session profile, and the error definitions used
//! across the transport and service layers.

pub mod errors;
pub mod messages;
pub mod session;

pub use errors::{ChatError, ChatResult};
pub use messages::{InboundFrame, InboundMessage, OutboundMessage, Role};
pub use session::SessionUser;

/// Opaque key scoping which conversation a connection subscribes to.
pub type ConversationId = String;

/// Lifecycle state of a chat connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    /// Transport closed; `reconnecting` tells whether a retry is scheduled.
    Closed { reconnecting: bool },
    Disposed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("idle"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Open => f.write_str("open"),
            ConnectionState::Closed { reconnecting: true } => f.write_str("closed (reconnecting)"),
            ConnectionState::Closed { reconnecting: false } => f.write_str("closed"),
            ConnectionState::Disposed => f.write_str("disposed"),
        }
    }
}
