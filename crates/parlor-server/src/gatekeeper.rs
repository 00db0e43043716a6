//! Admission control for inbound chat messages.
//!
//! Checks run cheapest first and the first failure wins: shape, channel
//! name, text length, per-identity cooldown, then channel membership. The
//! cooldown is checked before membership so a non-member who floods a
//! channel only ever learns that they are too fast.
//!
//! The cooldown is a plain "one accepted message per window" rule keyed by
//! identity (shared by all of its connections), not a token bucket: it caps
//! the rate but does not smooth bursts after an idle period.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parlor_shared::constants::MAX_MESSAGE_CHARS;
use parlor_shared::{ChannelName, ChannelNameError, Identity};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::subscriptions::SubscriptionRegistry;

/// Why a message was refused. The `Display` text goes back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Message must have a text and a channel")]
    Malformed,

    #[error("Invalid channel name: {0}")]
    InvalidChannel(ChannelNameError),

    #[error("Message is too long ({len} characters, max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("You are sending messages too fast, try again in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("You are not subscribed to channel {0}")]
    NotSubscribed(ChannelName),
}

/// An admitted chat message. Only the gatekeeper builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Identity,
    channel: ChannelName,
    text: String,
    sent_at: DateTime<Utc>,
}

impl Message {
    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sent_at(&self) -> DateTime<Utc> {
        self.sent_at
    }

    /// `[channel] sender: text`, without the prefix on the default channel.
    pub fn render(&self) -> String {
        if self.channel.is_default() {
            format!("{}: {}", self.sender, self.text)
        } else {
            format!("[{}] {}: {}", self.channel, self.sender, self.text)
        }
    }
}

/// A message that passed every check but has not used up the sender's
/// cooldown yet.
#[derive(Debug)]
pub struct Admission(Message);

#[derive(Clone)]
pub struct Gatekeeper {
    registry: SubscriptionRegistry,
    cooldown: Duration,
    last_accepted: Arc<Mutex<HashMap<Identity, DateTime<Utc>>>>,
}

impl Gatekeeper {
    pub fn new(registry: SubscriptionRegistry, cooldown: std::time::Duration) -> Self {
        Self {
            registry,
            cooldown: Duration::from_std(cooldown).unwrap_or(Duration::MAX),
            last_accepted: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run every check against the current state without recording
    /// anything. The result still has to be committed.
    pub async fn vet(
        &self,
        identity: &Identity,
        raw_channel: Option<&Value>,
        raw_text: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Admission, Rejection> {
        let (Some(Value::String(raw_channel)), Some(Value::String(text))) = (raw_channel, raw_text)
        else {
            return Err(Rejection::Malformed);
        };

        let channel = ChannelName::parse(raw_channel).map_err(Rejection::InvalidChannel)?;

        let len = text.chars().count();
        if len > MAX_MESSAGE_CHARS {
            return Err(Rejection::TextTooLong {
                len,
                max: MAX_MESSAGE_CHARS,
            });
        }

        {
            let last = self.last_accepted.lock().await;
            self.check_cooldown(last.get(identity).copied(), now)?;
        }

        if !self.registry.is_subscribed(identity, &channel).await {
            return Err(Rejection::NotSubscribed(channel));
        }

        Ok(Admission(Message {
            sender: identity.clone(),
            channel,
            text: text.clone(),
            sent_at: now,
        }))
    }

    /// Record the send against the sender's cooldown and release the message.
    ///
    /// The window is checked again: another connection of the same identity
    /// may have committed since this message was vetted.
    pub async fn commit(&self, admission: Admission) -> Result<Message, Rejection> {
        let Admission(message) = admission;
        {
            let mut last = self.last_accepted.lock().await;
            self.check_cooldown(last.get(&message.sender).copied(), message.sent_at)?;
            last.insert(message.sender.clone(), message.sent_at);
        }

        debug!(
            sender = %message.sender,
            channel = %message.channel,
            len = message.text.chars().count(),
            "Message admitted"
        );
        Ok(message)
    }

    #[cfg(test)]
    pub async fn admit(
        &self,
        identity: &Identity,
        raw_channel: Option<&Value>,
        raw_text: Option<&Value>,
        now: DateTime<Utc>,
    ) -> Result<Message, Rejection> {
        let admission = self.vet(identity, raw_channel, raw_text, now).await?;
        self.commit(admission).await
    }

    fn check_cooldown(
        &self,
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let Some(last) = last else {
            return Ok(());
        };

        let elapsed = now - last;
        if elapsed < self.cooldown {
            let wait = (self.cooldown - elapsed).num_milliseconds().max(0) as u64;
            return Err(Rejection::RateLimited {
                retry_after_ms: wait,
            });
        }
        Ok(())
    }

    /// Forget identities whose last accepted message is older than
    /// `max_idle`. Entries older than the cooldown no longer affect
    /// admission, so this only reclaims memory.
    pub async fn purge_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> usize {
        let max_idle = max_idle.max(self.cooldown);
        let mut last = self.last_accepted.lock().await;
        let before = last.len();
        last.retain(|_, accepted| now - *accepted < max_idle);
        before - last.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    fn gatekeeper_with(store: MemoryStore) -> Gatekeeper {
        let registry = SubscriptionRegistry::new(Arc::new(store));
        Gatekeeper::new(registry, std::time::Duration::from_millis(3000))
    }

    fn s(value: &str) -> Value {
        Value::from(value)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_admits_valid_message() {
        let gk = gatekeeper_with(MemoryStore::default());
        let alice = Identity::user("alice");

        let msg = gk
            .admit(&alice, Some(&s("general")), Some(&s("hello")), t0())
            .await
            .unwrap();

        assert_eq!(msg.sender(), &alice);
        assert_eq!(msg.channel().as_str(), "general");
        assert_eq!(msg.text(), "hello");
        assert_eq!(msg.sent_at(), t0());
        assert_eq!(msg.render(), "alice: hello");
    }

    #[tokio::test]
    async fn test_shape_check() {
        let gk = gatekeeper_with(MemoryStore::default());
        let alice = Identity::user("alice");

        assert_eq!(
            gk.admit(&alice, None, Some(&s("hi")), t0()).await,
            Err(Rejection::Malformed)
        );
        assert_eq!(
            gk.admit(&alice, Some(&s("general")), Some(&Value::from(7)), t0()).await,
            Err(Rejection::Malformed)
        );
        assert_eq!(
            gk.admit(&alice, Some(&Value::Null), Some(&s("hi")), t0()).await,
            Err(Rejection::Malformed)
        );
    }

    #[tokio::test]
    async fn test_path_traversal_channel_rejected() {
        let gk = gatekeeper_with(MemoryStore::default());

        assert_eq!(
            gk.admit(&Identity::user("alice"), Some(&s("../etc")), Some(&s("hi")), t0())
                .await,
            Err(Rejection::InvalidChannel(ChannelNameError::InvalidCharacter('.')))
        );
    }

    #[tokio::test]
    async fn test_text_limit_counts_characters() {
        let gk = gatekeeper_with(MemoryStore::default());
        let alice = Identity::user("alice");

        let exactly = "\u{e9}".repeat(200);
        assert!(gk
            .admit(&alice, Some(&s("general")), Some(&s(&exactly)), t0())
            .await
            .is_ok());

        let bob = Identity::user("bob");
        assert_eq!(
            gk.admit(&bob, Some(&s("general")), Some(&s(&"a".repeat(201))), t0())
                .await,
            Err(Rejection::TextTooLong { len: 201, max: 200 })
        );
    }

    #[tokio::test]
    async fn test_second_message_within_cooldown_is_rate_limited() {
        let gk = gatekeeper_with(MemoryStore::default());
        let alice = Identity::user("alice");
        let general = s("general");

        assert!(gk.admit(&alice, Some(&general), Some(&s("one")), t0()).await.is_ok());
        assert_eq!(
            gk.admit(&alice, Some(&general), Some(&s("two")), t0() + Duration::milliseconds(2999))
                .await,
            Err(Rejection::RateLimited { retry_after_ms: 1 })
        );

        // The rejection did not move the window.
        assert!(gk
            .admit(&alice, Some(&general), Some(&s("three")), t0() + Duration::milliseconds(3000))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_cooldown_is_per_identity() {
        let gk = gatekeeper_with(MemoryStore::default());
        let general = s("general");

        assert!(gk.admit(&Identity::user("alice"), Some(&general), Some(&s("a")), t0()).await.is_ok());
        assert!(gk.admit(&Identity::user("bob"), Some(&general), Some(&s("b")), t0()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_checked_before_membership() {
        let store = MemoryStore::default();
        store.seed("alice", &["general"]);
        let gk = gatekeeper_with(store);
        let alice = Identity::user("alice");

        assert!(gk.admit(&alice, Some(&s("general")), Some(&s("hi")), t0()).await.is_ok());
        assert!(matches!(
            gk.admit(&alice, Some(&s("secret")), Some(&s("hi")), t0() + Duration::milliseconds(10))
                .await,
            Err(Rejection::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_member_rejected_without_consuming_window() {
        let store = MemoryStore::default();
        store.seed("alice", &["general"]);
        let gk = gatekeeper_with(store);
        let alice = Identity::user("alice");

        assert_eq!(
            gk.admit(&alice, Some(&s("sports")), Some(&s("hi")), t0()).await,
            Err(Rejection::NotSubscribed(ChannelName::parse("sports").unwrap()))
        );
        assert!(gk.admit(&alice, Some(&s("general")), Some(&s("hi")), t0()).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_admissions_accept_one() {
        let gk = gatekeeper_with(MemoryStore::default());
        let alice = Identity::user("alice");

        let mut handles = Vec::new();
        for i in 0..10 {
            let gk = gk.clone();
            let alice = alice.clone();
            handles.push(tokio::spawn(async move {
                gk.admit(&alice, Some(&s("general")), Some(&s(&format!("m{i}"))), t0())
                    .await
                    .is_ok()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_second_commit_of_vetted_messages_is_rate_limited() {
        let gk = gatekeeper_with(MemoryStore::default());
        let alice = Identity::user("alice");
        let general = s("general");

        let first = gk.vet(&alice, Some(&general), Some(&s("a")), t0()).await.unwrap();
        let second = gk.vet(&alice, Some(&general), Some(&s("b")), t0()).await.unwrap();

        assert!(gk.commit(first).await.is_ok());
        assert!(matches!(
            gk.commit(second).await,
            Err(Rejection::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_purge_idle() {
        let gk = gatekeeper_with(MemoryStore::default());
        let general = s("general");
        gk.admit(&Identity::user("alice"), Some(&general), Some(&s("a")), t0()).await.unwrap();
        gk.admit(&Identity::user("bob"), Some(&general), Some(&s("b")), t0() + Duration::minutes(9))
            .await
            .unwrap();

        let purged = gk.purge_idle(Duration::minutes(10), t0() + Duration::minutes(11)).await;
        assert_eq!(purged, 1);
    }

    #[test]
    fn test_render_non_default_channel() {
        let msg = Message {
            sender: Identity::user("alice"),
            channel: ChannelName::parse("sports").unwrap(),
            text: "score!".into(),
            sent_at: t0(),
        };
        assert_eq!(msg.render(), "[sports] alice: score!");
    }
}
