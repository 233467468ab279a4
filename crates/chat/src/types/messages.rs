//! Wire and domain shapes for chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use waterchat_config::MessageSchema;

use super::session::SessionUser;
use crate::utils::time::{lenient_timestamp, WireTimestamp};

/// Dashboard role of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
    Customer,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
            Role::Customer => "customer",
            Role::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame as received from the chat backend, before display formatting.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub content: String,
    #[serde(deserialize_with = "string_or_number")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<WireTimestamp>,
}

impl InboundFrame {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// A message appended to the log. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    pub content: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub role: Option<Role>,
    /// Localized display time.
    pub timestamp: String,
    pub sent_at: DateTime<Utc>,
}

/// Payload written to the transport, shaped by the deployment's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Standard {
        sender_id: String,
        sender_name: String,
        role: Role,
        content: String,
    },
    Legacy {
        sender_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        area_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        customer: Option<String>,
        content: String,
    },
}

impl OutboundMessage {
    /// Stamp `content` with the session user according to `schema`.
    ///
    /// `content` must already be trimmed; `customer` is only carried by the
    /// legacy shape.
    pub fn compose(
        schema: MessageSchema,
        user: &SessionUser,
        customer: Option<&str>,
        content: &str,
    ) -> Self {
        match schema {
            MessageSchema::Standard => OutboundMessage::Standard {
                sender_id: user.uid.clone(),
                sender_name: user.display_name(),
                role: user.role,
                content: content.to_string(),
            },
            MessageSchema::Legacy => OutboundMessage::Legacy {
                sender_id: user.uid.clone(),
                area_id: user.area_id.clone(),
                customer: customer.map(str::to_string),
                content: content.to_string(),
            },
        }
    }

    pub fn content(&self) -> &str {
        match self {
            OutboundMessage::Standard { content, .. } | OutboundMessage::Legacy { content, .. } => {
                content
            }
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Accept identifiers the backend sends either as JSON strings or numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Int(value) => value.to_string(),
        Raw::Float(value) => value.to_string(),
    })
}

pub(crate) fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    let value: Option<Wrapper> = Option::deserialize(deserializer)?;
    Ok(value.map(|Wrapper(inner)| inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent() -> SessionUser {
        SessionUser {
            uid: "12".to_string(),
            area_id: Some("north".to_string()),
            firstname: Some("Ana".to_string()),
            lastname: Some("Lopez".to_string()),
            name: None,
            role: Role::Agent,
        }
    }

    #[test]
    fn inbound_frame_accepts_numeric_sender_id() {
        let frame = InboundFrame::parse(r#"{"content":"hi","sender_id":7,"timestamp":1704067200000}"#)
            .expect("frame should parse");

        assert_eq!(frame.sender_id, "7");
        assert_eq!(frame.content, "hi");
        assert!(frame.role.is_none());
    }

    #[test]
    fn inbound_frame_maps_unknown_role() {
        let frame = InboundFrame::parse(
            r#"{"content":"hi","sender_id":"7","role":"supervisor","sender_name":"Kim"}"#,
        )
        .expect("frame should parse");

        assert_eq!(frame.role, Some(Role::Unknown));
        assert_eq!(frame.sender_name.as_deref(), Some("Kim"));
        assert!(frame.timestamp.is_none());
    }

    #[test]
    fn inbound_frame_rejects_missing_content() {
        assert!(InboundFrame::parse(r#"{"sender_id":"7"}"#).is_err());
        assert!(InboundFrame::parse("not json").is_err());
    }

    #[test]
    fn standard_outbound_shape() {
        let message = OutboundMessage::compose(MessageSchema::Standard, &agent(), Some("99"), "hello");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            value,
            json!({
                "sender_id": "12",
                "sender_name": "Ana Lopez",
                "role": "agent",
                "content": "hello",
            })
        );
    }

    #[test]
    fn legacy_outbound_shape() {
        let message = OutboundMessage::compose(MessageSchema::Legacy, &agent(), Some("99"), "hello");
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(
            value,
            json!({
                "sender_id": "12",
                "area_id": "north",
                "customer": "99",
                "content": "hello",
            })
        );
    }

    #[test]
    fn legacy_outbound_omits_absent_fields() {
        let mut user = agent();
        user.area_id = None;

        let message = OutboundMessage::compose(MessageSchema::Legacy, &user, None, "hello");
        let frame = message.to_frame().unwrap();

        assert_eq!(frame, r#"{"sender_id":"12","content":"hello"}"#);
    }
}
