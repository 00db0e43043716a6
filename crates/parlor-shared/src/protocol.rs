use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::ChannelName;

/// Frames a client sends over the WebSocket (JSON text, tagged by `type`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Replace the sender's subscription list.
    SetChannels {
        #[serde(default)]
        channels: Vec<String>,
    },

    /// Post a message to a channel.
    ///
    /// Fields are kept as raw JSON so the gatekeeper can tell a missing or
    /// non-string field apart from a malformed frame.
    ChatMessage {
        #[serde(default)]
        text: Option<Value>,
        #[serde(default)]
        channel: Option<Value>,
    },
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Frames the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authoritative, normalized subscription list.
    Channels { channels: Vec<ChannelName> },

    /// Number of distinct identities with a live connection.
    OnlineCount { count: usize },

    /// Rendered chat line, e.g. `[sports] alice: score!`.
    ChatMessage { message: String },

    /// Non-fatal error, sent to the originating connection only.
    Error { reason: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload handed to the external push service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub body: String,
}

/// A browser `PushSubscription` as serialized by `subscription.toJSON()`.
/// Other members (e.g. `expirationTime`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEndpoint {
    pub endpoint: String,
    pub keys: PushKeys,
}

/// Client keys used to encrypt the payload for one subscription
/// (base64url, as the browser hands them out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_message() {
        let event = ClientEvent::parse(r#"{"type":"chat_message","text":"hi","channel":"general"}"#)
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::ChatMessage {
                text: Some(Value::from("hi")),
                channel: Some(Value::from("general")),
            }
        );
    }

    #[test]
    fn test_parse_chat_message_keeps_wrong_shapes() {
        let event = ClientEvent::parse(r#"{"type":"chat_message","text":42}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::ChatMessage {
                text: Some(Value::from(42)),
                channel: None,
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(ClientEvent::parse(r#"{"type":"shout"}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let json = ServerEvent::OnlineCount { count: 3 }.to_json().unwrap();
        assert_eq!(json, r#"{"type":"online_count","count":3}"#);

        let json = ServerEvent::Channels {
            channels: vec![ChannelName::default_channel()],
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"channels","channels":["general"]}"#);
    }

    #[test]
    fn test_push_endpoint_from_browser_subscription() {
        let raw = r#"{"endpoint":"https://push.example/abc","expirationTime":null,"keys":{"p256dh":"x","auth":"y"}}"#;
        let endpoint: PushEndpoint = serde_json::from_str(raw).unwrap();
        assert_eq!(endpoint.endpoint, "https://push.example/abc");
        assert_eq!(endpoint.keys.p256dh, "x");
        assert_eq!(endpoint.keys.auth, "y");
    }

    #[test]
    fn test_push_endpoint_requires_keys() {
        let raw = r#"{"endpoint":"https://push.example/abc"}"#;
        assert!(serde_json::from_str::<PushEndpoint>(raw).is_err());
    }
}
