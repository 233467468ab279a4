//! Signed-in user profile used to stamp outbound messages.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::errors::{ChatError, ChatResult};
use super::messages::{optional_string_or_number, string_or_number, Role};
use crate::utils::initials::initials;

/// The `user_data` profile written by the login flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(deserialize_with = "string_or_number")]
    pub uid: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub area_id: Option<String>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
    /// Pre-combined display name, preferred over first/last when present.
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
}

impl SessionUser {
    pub fn from_json(raw: &str) -> ChatResult<Self> {
        let user: SessionUser = serde_json::from_str(raw)
            .map_err(|error| ChatError::invalid_session(error.to_string()))?;

        if user.uid.trim().is_empty() {
            return Err(ChatError::invalid_session("uid must not be empty"));
        }

        Ok(user)
    }

    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ChatError::invalid_session(format!("cannot read {}: {error}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        [self.firstname.as_deref(), self.lastname.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn initials(&self) -> String {
        initials(&self.display_name())
    }
}
