//! Out-of-band push notifications for participants who missed a message.
//!
//! Delivery is best-effort: each notification runs in its own task and a
//! failure is only logged, except that a subscription the push service
//! reports as gone is forgotten. Registrations live in memory; clients
//! register again after a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parlor_shared::protocol::{PushEndpoint, PushPayload};
use parlor_shared::Identity;
use reqwest::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessage,
    WebPushMessageBuilder,
};

use crate::gatekeeper::Message;
use crate::subscriptions::SubscriptionRegistry;

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Push registration requires an authenticated identity")]
    Unauthenticated,

    #[error("Invalid push endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Push payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Web Push message could not be built: {0}")]
    Message(#[from] WebPushError),

    #[error("Push transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Push service rejected notification with status {0}")]
    Rejected(u16),
}

/// Hands a payload to the external push service.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn send(&self, endpoint: &PushEndpoint, payload: &PushPayload) -> Result<(), PushError>;
}

/// Application server identity used to sign push requests.
#[derive(Clone)]
pub struct VapidKey {
    /// Raw P-256 private scalar, base64url.
    pub private_key: String,
    /// `sub` claim, e.g. `mailto:ops@example.com`.
    pub subject: Option<String>,
}

/// Web Push delivery: the JSON payload is encrypted for the subscription
/// (`aes128gcm`), signed with the VAPID key when one is configured, and
/// posted to the subscription endpoint.
pub struct WebPushTransport {
    client: reqwest::Client,
    ttl_secs: u32,
    vapid: Option<VapidKey>,
}

impl WebPushTransport {
    pub fn new(timeout: Duration, ttl_secs: u64, vapid: Option<VapidKey>) -> Result<Self, PushError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            ttl_secs: u32::try_from(ttl_secs).unwrap_or(u32::MAX),
            vapid,
        })
    }

    fn build_message(
        &self,
        endpoint: &PushEndpoint,
        payload: &PushPayload,
    ) -> Result<WebPushMessage, PushError> {
        let subscription = SubscriptionInfo::new(
            &endpoint.endpoint,
            &endpoint.keys.p256dh,
            &endpoint.keys.auth,
        );
        let body = serde_json::to_vec(payload)?;

        let mut builder = WebPushMessageBuilder::new(&subscription);
        builder.set_payload(ContentEncoding::Aes128Gcm, &body);
        builder.set_ttl(self.ttl_secs);

        if let Some(vapid) = &self.vapid {
            let mut signature = VapidSignatureBuilder::from_base64(&vapid.private_key, &subscription)?;
            if let Some(subject) = &vapid.subject {
                signature.add_claim("sub", subject.as_str());
            }
            builder.set_vapid_signature(signature.build()?);
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(&self, endpoint: &PushEndpoint, payload: &PushPayload) -> Result<(), PushError> {
        let message = self.build_message(endpoint, payload)?;

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        request = match message.payload {
            Some(body) => {
                for (name, value) in &body.crypto_headers {
                    request = request.header(*name, value.as_str());
                }
                request
                    .header(CONTENT_ENCODING, body.content_encoding.to_str())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(body.content)
            }
            None => request.header(CONTENT_LENGTH, "0"),
        };

        let status = request.send().await?.status();
        if !status.is_success() {
            return Err(PushError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PushDispatcher {
    registrations: Arc<RwLock<HashMap<String, PushEndpoint>>>,
    transport: Arc<dyn PushTransport>,
    registry: SubscriptionRegistry,
}

impl PushDispatcher {
    pub fn new(transport: Arc<dyn PushTransport>, registry: SubscriptionRegistry) -> Self {
        Self {
            registrations: Arc::new(RwLock::new(HashMap::new())),
            transport,
            registry,
        }
    }

    /// Remember `endpoint` for `identity`, replacing any earlier one.
    /// Returns `true` when an earlier registration was replaced.
    pub async fn register(
        &self,
        identity: &Identity,
        endpoint: PushEndpoint,
    ) -> Result<bool, PushError> {
        let Identity::User(username) = identity else {
            return Err(PushError::Unauthenticated);
        };

        let url = reqwest::Url::parse(&endpoint.endpoint)
            .map_err(|e| PushError::InvalidEndpoint(e.to_string()))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(PushError::InvalidEndpoint(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let replaced = self
            .registrations
            .write()
            .await
            .insert(username.clone(), endpoint)
            .is_some();

        info!(user = %username, replaced, "Push endpoint registered");
        Ok(replaced)
    }

    pub async fn registered_identities(&self) -> Vec<Identity> {
        self.registrations
            .read()
            .await
            .keys()
            .map(|name| Identity::user(name.clone()))
            .collect()
    }

    /// Send `message` to every candidate that is subscribed to its channel
    /// and has an endpoint. Candidates must be identities that did not get
    /// the message live. Returns how many notifications were started; their
    /// outcome is only logged, except that a subscription the push service
    /// reports as gone is dropped.
    pub async fn notify_offline(
        &self,
        message: &Message,
        candidates: impl IntoIterator<Item = Identity>,
    ) -> usize {
        let payload = PushPayload {
            body: message.render(),
        };
        let mut started = 0;

        for identity in candidates {
            if identity == *message.sender() {
                continue;
            }

            let Some(endpoint) = self.endpoint_for(&identity).await else {
                continue;
            };

            if !self.registry.is_subscribed(&identity, message.channel()).await {
                continue;
            }

            let transport = self.transport.clone();
            let registrations = self.registrations.clone();
            let payload = payload.clone();
            tokio::spawn(async move {
                match transport.send(&endpoint, &payload).await {
                    Ok(()) => debug!(recipient = %identity, "Push notification delivered"),
                    Err(PushError::Rejected(status @ (404 | 410))) => {
                        info!(recipient = %identity, status, "Push subscription expired, dropping it");
                        let mut registrations = registrations.write().await;
                        // Only drop it if the client has not registered a new one meanwhile.
                        if registrations
                            .get(identity.name())
                            .is_some_and(|current| current.endpoint == endpoint.endpoint)
                        {
                            registrations.remove(identity.name());
                        }
                    }
                    Err(e) => warn!(recipient = %identity, error = %e, "Push notification failed"),
                }
            });
            started += 1;
        }

        started
    }

    async fn endpoint_for(&self, identity: &Identity) -> Option<PushEndpoint> {
        let Identity::User(username) = identity else {
            return None;
        };
        self.registrations.read().await.get(username).cloned()
    }
}
