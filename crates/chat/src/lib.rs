//! # Waterchat Chat Crate
//!
//! Client side of the support desk's live chat: one persistent connection
//! per conversation, decoding of inbound frames into a typed message log,
//! and automatic recovery after the connection drops.
//!
//! ## Architecture
//!
//! - **Types**: message shapes, session profile, connection state, errors
//! - **Transport**: the connector seam, the WebSocket implementation and an
//!   in-memory mock
//! - **Services**: the connection manager, the task driving it, reconnect
//!   policies and the conversation list client
//! - **Utils**: timestamp handling and initials
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waterchat_chat::{ChatClient, ChatConnectionManager, ManagerOptions, SessionUser, WsConnector};
//!
//! # async fn run(session: SessionUser) -> waterchat_chat::ChatResult<()> {
//! let manager = ChatConnectionManager::new(
//!     Arc::new(WsConnector::default()),
//!     session,
//!     ManagerOptions::new("ws://localhost:8000"),
//! );
//! let client = ChatClient::spawn(manager)?;
//! client.connect("42");
//! client.send("hello", None);
//! # Ok(())
//! # }
//! ```

pub mod services;
pub mod transport;
pub mod types;
pub mod utils;

pub use services::{
    chat_endpoint, ChatClient, ChatConnectionManager, ConversationService, ConversationSummary,
    ExponentialBackoff, FixedDelay, ManagerOptions, RetryPolicy,
};
pub use transport::{Connector, MockConnector, MockPeer, TransportEvent, WsConnector};
pub use types::{
    ChatError, ChatResult, ConnectionState, ConversationId, InboundMessage, OutboundMessage, Role,
    SessionUser,
};
pub use utils::TimeFormatter;
