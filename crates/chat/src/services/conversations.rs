//! Conversation list backed by the REST API.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::types::messages::optional_string_or_number;
use crate::types::{ChatError, ChatResult};
use crate::utils::initials::initials;
use crate::utils::time::{lenient_timestamp, TimeFormatter, WireTimestamp};

const AVATAR_BASE_URL: &str = "https://eu.ui-avatars.com/api/";

/// One row of the conversation sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub name: String,
    pub initials: String,
    pub last_message: String,
    pub avatar_url: String,
    pub customer: Option<String>,
    /// Display time of the last message; empty when the backend sent none.
    pub time: String,
}

#[derive(Debug, Deserialize)]
struct ConversationListResponse {
    messages: Vec<ConversationEntry>,
}

#[derive(Debug, Deserialize)]
struct ConversationEntry {
    fullname: String,
    #[serde(default)]
    content: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    customer: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    timestamp: Option<WireTimestamp>,
}

/// Service for fetching the latest message of each conversation
pub struct ConversationService {
    client: Client,
    formatter: TimeFormatter,
}

impl ConversationService {
    pub fn new(request_timeout: Duration, formatter: TimeFormatter) -> ChatResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, formatter })
    }

    /// Fetch and map the conversation list at `url`.
    pub async fn list(&self, url: &str) -> ChatResult<Vec<ConversationSummary>> {
        debug!(url, "fetching conversations");

        let response = self.client.get(url).send().await.map_err(|err| {
            error!(url, error = %err, "conversation request failed");
            ChatError::from(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(url, status = status.as_u16(), "failed to fetch conversations");
            return Err(ChatError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body: ConversationListResponse = response.json().await?;
        debug!(count = body.messages.len(), "conversations fetched");

        Ok(body
            .messages
            .into_iter()
            .map(|entry| self.summarize(entry))
            .collect())
    }

    fn summarize(&self, entry: ConversationEntry) -> ConversationSummary {
        let time = entry
            .timestamp
            .as_ref()
            .and_then(WireTimestamp::to_utc)
            .map(|instant| self.formatter.format(&instant))
            .unwrap_or_default();

        ConversationSummary {
            initials: initials(&entry.fullname),
            avatar_url: avatar_url(&entry.fullname),
            name: entry.fullname,
            last_message: entry.content,
            customer: entry.customer,
            time,
        }
    }
}

/// Generated avatar for a display name.
pub fn avatar_url(name: &str) -> String {
    format!("{AVATAR_BASE_URL}?name={}", urlencoding::encode(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_url_encodes_name() {
        assert_eq!(
            avatar_url("Ana María"),
            "https://eu.ui-avatars.com/api/?name=Ana%20Mar%C3%ADa"
        );
    }
}
