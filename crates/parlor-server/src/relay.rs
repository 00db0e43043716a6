//! The message relay: one handle bundling the presence tracker, the
//! subscription registry, the gatekeeper, the broadcast router and the push
//! dispatcher, handed to every connection task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parlor_shared::protocol::ServerEvent;
use parlor_shared::{ChannelName, ConnectionId, Identity};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::gatekeeper::{Gatekeeper, Message, Rejection};
use crate::presence::{Connection, PresenceChange, PresenceTracker};
use crate::push::{PushDispatcher, PushTransport};
use crate::router::BroadcastRouter;
use crate::subscriptions::{SubscriptionRegistry, UserRecordStore};

#[derive(Clone)]
pub struct Relay {
    pub presence: PresenceTracker,
    pub registry: SubscriptionRegistry,
    pub gatekeeper: Gatekeeper,
    pub router: BroadcastRouter,
    pub push: PushDispatcher,
    /// Held from committing an admission through live delivery, so every
    /// recipient sees messages in admission order.
    delivery_order: Arc<Mutex<()>>,
}

impl Relay {
    pub fn new(
        store: Arc<dyn UserRecordStore>,
        transport: Arc<dyn PushTransport>,
        cooldown: Duration,
    ) -> Self {
        let presence = PresenceTracker::new();
        let registry = SubscriptionRegistry::new(store);

        Self {
            gatekeeper: Gatekeeper::new(registry.clone(), cooldown),
            router: BroadcastRouter::new(presence.clone(), registry.clone()),
            push: PushDispatcher::new(transport, registry.clone()),
            presence,
            registry,
            delivery_order: Arc::new(Mutex::new(())),
        }
    }

    /// Bring a new connection online and send it its subscription list.
    pub async fn connect(&self, identity: &Identity, connection: Connection) -> Vec<ChannelName> {
        self.presence.register(identity, connection.clone()).await;

        let channels = self.registry.get_subscriptions(identity).await;
        connection.send(ServerEvent::Channels {
            channels: channels.clone(),
        });
        channels
    }

    /// Take a connection out of routing. Safe to call more than once.
    pub async fn disconnect(&self, conn_id: ConnectionId) -> PresenceChange {
        self.presence.deregister(conn_id).await
    }

    pub async fn set_channels(&self, identity: &Identity, requested: &[String]) -> Vec<ChannelName> {
        self.registry.set_subscriptions(identity, requested).await
    }

    /// Admit a message, deliver it live, and hand everyone who has a push
    /// endpoint but did not get it live to the push dispatcher.
    ///
    /// Push delivery runs in the background; this returns once live
    /// delivery has been queued.
    pub async fn publish(
        &self,
        identity: &Identity,
        raw_channel: Option<&Value>,
        raw_text: Option<&Value>,
    ) -> Result<Message, Rejection> {
        // Membership may need a store read; keep that outside the ordering
        // lock so rejected traffic never queues behind it.
        let admission = self
            .gatekeeper
            .vet(identity, raw_channel, raw_text, Utc::now())
            .await?;

        let (message, delivered) = {
            let _turn = self.delivery_order.lock().await;
            let message = self.gatekeeper.commit(admission).await?;
            let delivered = self.router.route(&message).await;
            (message, delivered)
        };

        let candidates: Vec<Identity> = self
            .push
            .registered_identities()
            .await
            .into_iter()
            .filter(|identity| !delivered.contains(identity))
            .collect();

        if !candidates.is_empty() {
            debug!(channel = %message.channel(), candidates = candidates.len(), "Handing message to push");
            let push = self.push.clone();
            let pending = message.clone();
            tokio::spawn(async move {
                push.notify_offline(&pending, candidates).await;
            });
        }

        Ok(message)
    }
}
