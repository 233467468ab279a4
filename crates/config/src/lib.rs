use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "waterchat.toml",
    "config/waterchat.toml",
    "crates/config/waterchat.toml",
    "../waterchat.toml",
    "../config/waterchat.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Settings for the live chat connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub base_url: String,
    #[serde(default)]
    pub schema: MessageSchema,
    #[serde(default = "ChatConfig::default_conversation_query")]
    pub conversation_query: bool,
    #[serde(default = "ChatConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl ChatConfig {
    const fn default_conversation_query() -> bool {
        true
    }

    const fn default_connect_timeout() -> u64 {
        10
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://127.0.0.1:8000".to_string(),
            schema: MessageSchema::default(),
            conversation_query: Self::default_conversation_query(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            reconnect: ReconnectConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

/// Outbound payload shape expected by the deployed chat backend.
///
/// `standard` sends `{sender_id, sender_name, role, content}`, `legacy`
/// sends `{sender_id, area_id, customer, content}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSchema {
    #[default]
    Standard,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    #[default]
    Fixed,
    Exponential,
}

/// Reconnect behaviour after the transport closes.
///
/// ```
/// use waterchat_config::{ReconnectConfig, ReconnectStrategy};
///
/// let reconnect = ReconnectConfig::default();
/// assert_eq!(reconnect.strategy, ReconnectStrategy::Fixed);
/// assert_eq!(reconnect.delay_ms, 1000);
/// assert!(reconnect.max_attempts.is_none());
/// assert!(reconnect.on_normal_close);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: ReconnectStrategy,
    #[serde(default = "ReconnectConfig::default_delay")]
    pub delay_ms: u64,
    #[serde(default = "ReconnectConfig::default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "ReconnectConfig::default_on_normal_close")]
    pub on_normal_close: bool,
}

impl ReconnectConfig {
    const fn default_delay() -> u64 {
        1000
    }

    const fn default_max_delay() -> u64 {
        30_000
    }

    const fn default_on_normal_close() -> bool {
        true
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::default(),
            delay_ms: Self::default_delay(),
            max_delay_ms: Self::default_max_delay(),
            max_attempts: None,
            on_normal_close: Self::default_on_normal_close(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// `strftime` pattern used for message timestamps.
    #[serde(default = "DisplayConfig::default_time_format")]
    pub time_format: String,
    /// Fixed offset used instead of the local zone when set.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl DisplayConfig {
    fn default_time_format() -> String {
        "%-I:%M:%S %p".to_string()
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time_format: Self::default_time_format(),
            utc_offset_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub conversations_url: Option<String>,
    #[serde(default = "ApiConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl ApiConfig {
    const fn default_request_timeout() -> u64 {
        30
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            conversations_url: None,
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// JSON file holding the signed-in user's profile.
    pub path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: "session.json".to_string(),
        }
    }
}

/// Load the client configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use waterchat_config::load;
///
/// std::env::remove_var("WATERCHAT_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.chat.base_url.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("chat.base_url", defaults.chat.base_url.clone())?
        .set_default("chat.conversation_query", defaults.chat.conversation_query)?
        .set_default(
            "chat.connect_timeout_seconds",
            i64::try_from(defaults.chat.connect_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default(
            "chat.reconnect.delay_ms",
            i64::try_from(defaults.chat.reconnect.delay_ms).unwrap_or(i64::MAX),
        )?
        .set_default("chat.display.time_format", defaults.chat.display.time_format.clone())?
        .set_default(
            "api.request_timeout_seconds",
            i64::try_from(defaults.api.request_timeout_seconds).unwrap_or(i64::MAX),
        )?
        .set_default("session.path", defaults.session.path.clone())?;

    let environment_overrides = config::Environment::with_prefix("WATERCHAT").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("WATERCHAT_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via WATERCHAT_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.chat.base_url.ends_with('/') {
        config.chat.base_url = config.chat.base_url.trim_end_matches('/').to_string();
    }

    if config.chat.reconnect.max_delay_ms < config.chat.reconnect.delay_ms {
        config.chat.reconnect.max_delay_ms = config.chat.reconnect.delay_ms;
    }

    debug!(?config, "loaded client configuration");
    Ok(config)
}
