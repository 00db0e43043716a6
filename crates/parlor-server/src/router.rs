use std::collections::HashSet;

use parlor_shared::protocol::ServerEvent;
use parlor_shared::Identity;
use tracing::{debug, trace};

use crate::gatekeeper::Message;
use crate::presence::PresenceTracker;
use crate::subscriptions::SubscriptionRegistry;

/// Fans an admitted message out to every live connection subscribed to its
/// channel, the sender's own connections included.
#[derive(Clone)]
pub struct BroadcastRouter {
    presence: PresenceTracker,
    registry: SubscriptionRegistry,
}

impl BroadcastRouter {
    pub fn new(presence: PresenceTracker, registry: SubscriptionRegistry) -> Self {
        Self { presence, registry }
    }

    /// Deliver `message` live and return the identities that received it.
    ///
    /// Sends only enqueue onto each connection's writer, so a dead or slow
    /// connection never holds up the others.
    pub async fn route(&self, message: &Message) -> HashSet<Identity> {
        let rendered = message.render();
        let mut delivered = HashSet::new();

        for identity in self.presence.online_identities().await {
            if !self.registry.is_subscribed(&identity, message.channel()).await {
                continue;
            }

            let connections = self.presence.connections_for(&identity).await;
            let mut reached = false;
            for conn in connections {
                let event = ServerEvent::ChatMessage {
                    message: rendered.clone(),
                };
                if conn.send(event) {
                    reached = true;
                } else {
                    trace!(identity = %identity, connection = %conn.id(), "Skipping closed connection");
                }
            }

            if reached {
                delivered.insert(identity);
            }
        }

        debug!(
            sender = %message.sender(),
            channel = %message.channel(),
            recipients = delivered.len(),
            "Message routed"
        );
        delivered
    }
}
