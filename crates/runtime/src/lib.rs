use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use waterchat_chat::{
    ChatClient, ChatConnectionManager, ConversationService, ManagerOptions, SessionUser,
    TimeFormatter, WsConnector,
};
use waterchat_config::{AppConfig, ChatConfig};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything a client process needs, resolved once from configuration.
#[derive(Clone)]
pub struct ClientServices {
    pub session: SessionUser,
    pub connector: Arc<WsConnector>,
    pub conversations: Arc<ConversationService>,
    pub conversations_url: Option<String>,
    chat: ChatConfig,
}

impl ClientServices {
    pub fn initialise(config: &AppConfig) -> Result<Self> {
        let session = load_session(&config.session.path)?;

        // Validate the chat section up front so a bad pattern or base URL
        // fails at startup rather than on first connect.
        ManagerOptions::from_config(&config.chat).context("invalid chat configuration")?;

        let connector = Arc::new(WsConnector::new(Duration::from_secs(
            config.chat.connect_timeout_seconds,
        )));

        let formatter =
            TimeFormatter::from_config(&config.chat.display).context("invalid display format")?;
        let conversations = Arc::new(
            ConversationService::new(
                Duration::from_secs(config.api.request_timeout_seconds),
                formatter,
            )
            .context("failed to build conversation client")?,
        );

        info!(
            uid = %session.uid,
            role = %session.role,
            base_url = %config.chat.base_url,
            "client services ready"
        );

        Ok(Self {
            session,
            connector,
            conversations,
            conversations_url: config.api.conversations_url.clone(),
            chat: config.chat.clone(),
        })
    }

    pub fn chat_config(&self) -> &ChatConfig {
        &self.chat
    }

    /// Build a fresh manager for this session. Must be called inside a tokio
    /// runtime when the result is handed to [`ChatClient::spawn`].
    pub fn connection_manager(&self) -> Result<ChatConnectionManager> {
        let options =
            ManagerOptions::from_config(&self.chat).context("invalid chat configuration")?;
        Ok(ChatConnectionManager::new(
            self.connector.clone(),
            self.session.clone(),
            options,
        ))
    }

    pub fn spawn_chat(&self) -> Result<ChatClient> {
        let manager = self.connection_manager()?;
        ChatClient::spawn(manager).context("failed to start chat client")
    }
}

fn load_session(path: &str) -> Result<SessionUser> {
    let path = Path::new(path);
    SessionUser::load(path)
        .with_context(|| format!("failed to load session from {}", path.display()))
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
