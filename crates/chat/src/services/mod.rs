//! Service layer for the chat client.

pub mod client;
pub mod conversations;
pub mod manager;
pub mod retry;

pub use client::ChatClient;
pub use conversations::{ConversationService, ConversationSummary};
pub use manager::{chat_endpoint, ChatConnectionManager, ManagerOptions, MessageCallback};
pub use retry::{policy_from_config, ExponentialBackoff, FixedDelay, RetryPolicy};
