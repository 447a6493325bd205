//! Inbound message model shared by the listener, router and handlers.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message category used to pick a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Channel (flood) text.
    Text,
    /// Text addressed to this node by a contact.
    Direct,
    Other(String),
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => MessageKind::Text,
            "direct" => MessageKind::Direct,
            _ => MessageKind::Other(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Text => f.write_str("text"),
            MessageKind::Direct => f.write_str("direct"),
            MessageKind::Other(s) => f.write_str(s),
        }
    }
}

/// A message received from the mesh, ready for dispatch.
///
/// `channel_index` comes straight off the wire while `channel_name` is only known when
/// this session allocated that index itself, so both are carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub content: String,
    pub kind: MessageKind,
    /// Unix seconds.
    pub timestamp: u64,
    pub channel_name: Option<String>,
    pub channel_index: Option<u8>,
    /// Public-key prefix of a direct-message sender.
    pub sender_key: Option<[u8; 6]>,
}

impl InboundMessage {
    pub fn text(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            kind: MessageKind::Text,
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            channel_name: None,
            channel_index: None,
            sender_key: None,
        }
    }

    pub fn on_channel(mut self, name: Option<String>, index: Option<u8>) -> Self {
        self.channel_name = name;
        self.channel_index = index;
        self
    }
}

/// JSON shape of a message line in simulation mode.
#[derive(Debug, Deserialize)]
pub(crate) struct SimulatedMessage {
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_index: Option<u8>,
}

fn default_sender() -> String {
    "unknown".to_string()
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        assert_eq!(MessageKind::from("text".to_string()), MessageKind::Text);
        assert_eq!(MessageKind::from("direct".to_string()), MessageKind::Direct);
        assert_eq!(
            MessageKind::from("status".to_string()),
            MessageKind::Other("status".to_string())
        );
        assert_eq!(String::from(MessageKind::Text), "text");
    }

    #[test]
    fn simulated_message_defaults() {
        let msg: SimulatedMessage = serde_json::from_str(r#"{"content":"wx leeds"}"#).unwrap();
        assert_eq!(msg.sender, "unknown");
        assert_eq!(msg.kind, MessageKind::Text);
        assert!(msg.timestamp.is_none());
        assert!(msg.channel.is_none());

        let msg: SimulatedMessage = serde_json::from_str(
            r#"{"sender":"Tim","content":"hi","type":"text","timestamp":1771711343.25,"channel":"weather","channel_index":2}"#,
        )
        .unwrap();
        assert_eq!(msg.timestamp, Some(1771711343.25));
        assert_eq!(msg.channel.as_deref(), Some("weather"));
        assert_eq!(msg.channel_index, Some(2));
    }
}
