//! Error types for the chat client.

use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Main error type for the chat client.
///
/// The connection manager never hands these to its caller; it logs them and
/// carries on. The conversation REST client and the session loader do return
/// them.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid chat endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Transport failed to open: {message}")]
    TransportOpen { message: String },

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Malformed inbound payload: {0}")]
    MalformedInbound(#[from] serde_json::Error),

    #[error("Failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Socket not ready, message not sent")]
    SendWhileDisconnected,

    #[error("Message content is empty")]
    EmptyMessage,

    #[error("Chat connection has been disposed")]
    Disposed,

    #[error("Invalid session: {message}")]
    InvalidSession { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ChatError {
    /// Create an invalid endpoint error
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a transport open error
    pub fn transport_open(message: impl Into<String>) -> Self {
        Self::TransportOpen { message: message.into() }
    }

    /// Create an invalid session error
    pub fn invalid_session(message: impl Into<String>) -> Self {
        Self::InvalidSession { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}
