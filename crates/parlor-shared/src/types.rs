use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_CHANNEL, GUEST_PREFIX, MAX_CHANNEL_NAME_LEN};
use crate::error::ChannelNameError;

/// Who is on the other end of a connection, as resolved by the auth layer.
///
/// Guest labels are not guaranteed unique and carry no durable record, so
/// they never take part in subscription persistence or push registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    User(String),
    Guest(String),
}

impl Identity {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    /// Mint a fresh guest label (`guest-` followed by 8 hex chars).
    pub fn guest() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::Guest(format!("{GUEST_PREFIX}{}", &id[..8]))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::User(name) | Self::Guest(name) => name,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A channel is nothing more than a name matching `[A-Za-z0-9_-]{1,32}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn parse(raw: &str) -> Result<Self, ChannelNameError> {
        if raw.is_empty() {
            return Err(ChannelNameError::Empty);
        }

        let len = raw.chars().count();
        if len > MAX_CHANNEL_NAME_LEN {
            return Err(ChannelNameError::TooLong {
                len,
                max: MAX_CHANNEL_NAME_LEN,
            });
        }

        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(ChannelNameError::InvalidCharacter(bad));
        }

        Ok(Self(raw.to_string()))
    }

    /// The channel every participant belongs to.
    pub fn default_channel() -> Self {
        Self(DEFAULT_CHANNEL.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_CHANNEL
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelName {
    type Error = ChannelNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of one live connection. Stable for the lifetime of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_accepts_pattern() {
        for raw in ["general", "sports", "a", "Team_42-x", &"z".repeat(32)] {
            assert!(ChannelName::parse(raw).is_ok(), "{raw} should be valid");
        }
    }

    #[test]
    fn test_channel_name_rejects_path_traversal() {
        assert_eq!(
            ChannelName::parse("../etc"),
            Err(ChannelNameError::InvalidCharacter('.'))
        );
    }

    #[test]
    fn test_channel_name_rejects_empty_and_long() {
        assert_eq!(ChannelName::parse(""), Err(ChannelNameError::Empty));
        assert_eq!(
            ChannelName::parse(&"a".repeat(33)),
            Err(ChannelNameError::TooLong { len: 33, max: 32 })
        );
        assert!(ChannelName::parse("caf\u{e9}").is_err());
        assert!(ChannelName::parse("with space").is_err());
    }

    #[test]
    fn test_channel_name_serde_validates() {
        let ok: ChannelName = serde_json::from_str("\"sports\"").unwrap();
        assert_eq!(ok.as_str(), "sports");
        assert!(serde_json::from_str::<ChannelName>("\"no/slash\"").is_err());
    }

    #[test]
    fn test_guest_labels() {
        let guest = Identity::guest();
        assert!(!guest.is_authenticated());
        assert!(guest.name().starts_with(GUEST_PREFIX));
        assert_eq!(guest.name().len(), GUEST_PREFIX.len() + 8);
        assert!(Identity::user("alice").is_authenticated());
    }
}
