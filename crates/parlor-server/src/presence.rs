//! Who is connected right now.
//!
//! The tracker maps each live connection to exactly one identity and each
//! identity to the set of its live connections (several tabs or devices).
//! State lives only as long as the process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parlor_shared::protocol::ServerEvent;
use parlor_shared::{ConnectionId, Identity};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

/// Sender half feeding a connection's writer task.
pub type ConnectionSender = mpsc::UnboundedSender<ServerEvent>;

/// Handle to one live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: ConnectionSender,
}

impl Connection {
    pub fn new(sender: ConnectionSender) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for this connection. Returns `false` once the writer
    /// side is gone; the caller moves on either way.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Presence effect of a register/deregister call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    CameOnline,
    WentOffline,
    Unchanged,
}

#[derive(Default)]
struct PresenceState {
    by_identity: HashMap<Identity, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, (Identity, Connection)>,
}

impl PresenceState {
    fn broadcast_count(&self) {
        let count = self.by_identity.len();
        for (conn_id, (_, conn)) in &self.connections {
            if !conn.send(ServerEvent::OnlineCount { count }) {
                debug!(connection = %conn_id, "Online count not delivered, connection closing");
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct PresenceTracker {
    state: Arc<RwLock<PresenceState>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under `identity` and push the online count to
    /// everyone. A connection id that is already registered is refused.
    pub async fn register(&self, identity: &Identity, connection: Connection) -> PresenceChange {
        let mut state = self.state.write().await;

        if let Some((owner, _)) = state.connections.get(&connection.id()) {
            error!(
                connection = %connection.id(),
                owner = %owner,
                identity = %identity,
                "Connection already registered, refusing to remap it"
            );
            return PresenceChange::Unchanged;
        }

        let conn_id = connection.id();
        state
            .connections
            .insert(conn_id, (identity.clone(), connection));
        let conns = state.by_identity.entry(identity.clone()).or_default();
        conns.insert(conn_id);
        let live = conns.len();

        let change = if live == 1 {
            PresenceChange::CameOnline
        } else {
            PresenceChange::Unchanged
        };

        info!(
            identity = %identity,
            connection = %conn_id,
            connections = live,
            online = state.by_identity.len(),
            "Connection registered"
        );

        state.broadcast_count();
        change
    }

    /// Remove a connection. Unknown or already-removed connections are a
    /// no-op, so a disconnect can safely be reported more than once.
    pub async fn deregister(&self, conn_id: ConnectionId) -> PresenceChange {
        let mut state = self.state.write().await;

        let Some((identity, _)) = state.connections.remove(&conn_id) else {
            debug!(connection = %conn_id, "Deregister for unknown connection ignored");
            return PresenceChange::Unchanged;
        };

        let now_empty = match state.by_identity.get_mut(&identity) {
            Some(conns) => {
                conns.remove(&conn_id);
                conns.is_empty()
            }
            None => {
                error!(
                    identity = %identity,
                    connection = %conn_id,
                    "Connection mapped to an identity with no presence entry"
                );
                false
            }
        };

        let change = if now_empty {
            state.by_identity.remove(&identity);
            PresenceChange::WentOffline
        } else {
            PresenceChange::Unchanged
        };

        info!(
            identity = %identity,
            connection = %conn_id,
            online = state.by_identity.len(),
            "Connection deregistered"
        );

        state.broadcast_count();
        change
    }

    pub async fn is_online(&self, identity: &Identity) -> bool {
        self.state.read().await.by_identity.contains_key(identity)
    }

    /// Distinct identities with at least one live connection.
    pub async fn online_count(&self) -> usize {
        self.state.read().await.by_identity.len()
    }

    pub async fn online_identities(&self) -> Vec<Identity> {
        self.state.read().await.by_identity.keys().cloned().collect()
    }

    /// Live connections of `identity`; empty when offline.
    pub async fn connections_for(&self, identity: &Identity) -> Vec<Connection> {
        let state = self.state.read().await;
        state
            .by_identity
            .get(identity)
            .into_iter()
            .flatten()
            .filter_map(|conn_id| state.connections.get(conn_id))
            .map(|(_, conn)| conn.clone())
            .collect()
    }
}
