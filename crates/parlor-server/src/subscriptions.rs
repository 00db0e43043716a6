//! Channel subscription registry.
//!
//! The user-record store is the source of truth; this module keeps a cache
//! in front of it and enforces the subscription-set invariants: every set
//! contains the default channel and only valid, unique channel names.
//!
//! Store calls run on the blocking pool and never while a cache lock is
//! held. When the store misbehaves the registry degrades to the default
//! channel (reads) or to cache-only updates (writes) so chat keeps working.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use parlor_shared::{ChannelName, Identity};
use parlor_store::{Database, StoreError};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// Persistent per-user subscription records.
pub trait UserRecordStore: Send + Sync + 'static {
    /// `Ok(None)` when the user has no record yet.
    fn load_channels(&self, username: &str) -> Result<Option<Vec<ChannelName>>, StoreError>;

    fn save_channels(&self, username: &str, channels: &[ChannelName]) -> Result<(), StoreError>;
}

/// [`UserRecordStore`] over the SQLite user database.
pub struct SqliteUserStore {
    db: StdMutex<Database>,
}

impl SqliteUserStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: StdMutex::new(db),
        }
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&Database) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let db = self
            .db
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
        f(&db)
    }
}

impl UserRecordStore for SqliteUserStore {
    fn load_channels(&self, username: &str) -> Result<Option<Vec<ChannelName>>, StoreError> {
        self.with_db(|db| db.get_user_channels(username))
    }

    fn save_channels(&self, username: &str, channels: &[ChannelName]) -> Result<(), StoreError> {
        self.with_db(|db| db.set_user_channels(username, channels))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn UserRecordStore>,
    cache: Arc<RwLock<HashMap<String, Vec<ChannelName>>>>,
    /// Serializes persist-then-cache updates so the cache never ends up
    /// older than the store.
    write_lock: Arc<Mutex<()>>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn UserRecordStore>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(HashMap::new())),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current subscriptions of `identity`, in the order of the last update.
    ///
    /// Guests always get the default channel alone.
    pub async fn get_subscriptions(&self, identity: &Identity) -> Vec<ChannelName> {
        let Identity::User(username) = identity else {
            return vec![ChannelName::default_channel()];
        };

        if let Some(cached) = self.cache.read().await.get(username) {
            return cached.clone();
        }

        let store = self.store.clone();
        let user = username.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_channels(&user)).await;

        let channels = match loaded {
            Ok(Ok(Some(stored))) => repair(username, stored),
            Ok(Ok(None)) => {
                debug!(user = %username, "No stored subscriptions, seeding default");
                vec![ChannelName::default_channel()]
            }
            Ok(Err(e)) => {
                warn!(user = %username, error = %e, "User store unreadable, using default subscriptions");
                return vec![ChannelName::default_channel()];
            }
            Err(e) => {
                error!(user = %username, error = %e, "Subscription load task failed");
                return vec![ChannelName::default_channel()];
            }
        };

        // An update that landed while we were loading wins over what we read.
        self.cache
            .write()
            .await
            .entry(username.clone())
            .or_insert(channels)
            .clone()
    }

    /// Replace the subscriptions of `identity` with the normalized form of
    /// `requested` and return the authoritative list.
    ///
    /// Guests have no durable record, so for them this is a no-op.
    pub async fn set_subscriptions(
        &self,
        identity: &Identity,
        requested: &[String],
    ) -> Vec<ChannelName> {
        let Identity::User(username) = identity else {
            debug!(identity = %identity, "Ignoring subscription update from guest");
            return self.get_subscriptions(identity).await;
        };

        let channels = normalize(requested);
        let _guard = self.write_lock.lock().await;

        let store = self.store.clone();
        let user = username.clone();
        let to_save = channels.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_channels(&user, &to_save)).await;

        match saved {
            Ok(Ok(())) => debug!(user = %username, channels = ?channels, "Subscriptions updated"),
            Ok(Err(e)) => {
                warn!(user = %username, error = %e, "User store unwritable, keeping subscriptions in memory only")
            }
            Err(e) => error!(user = %username, error = %e, "Subscription save task failed"),
        }

        self.cache
            .write()
            .await
            .insert(username.clone(), channels.clone());
        channels
    }

    pub async fn is_subscribed(&self, identity: &Identity, channel: &ChannelName) -> bool {
        channel.is_default() || self.get_subscriptions(identity).await.contains(channel)
    }
}

/// Trim, drop invalid or empty names, dedupe (first occurrence wins) and make
/// sure the default channel is present, at the front if it was missing.
pub fn normalize(requested: &[String]) -> Vec<ChannelName> {
    let mut seen = HashSet::new();
    let mut channels: Vec<ChannelName> = requested
        .iter()
        .filter_map(|raw| ChannelName::parse(raw.trim()).ok())
        .filter(|channel| seen.insert(channel.clone()))
        .collect();

    if !channels.iter().any(ChannelName::is_default) {
        channels.insert(0, ChannelName::default_channel());
    }
    channels
}

/// Stored sets should already be normalized; anything else is a broken
/// record that gets fixed in memory and reported.
fn repair(username: &str, stored: Vec<ChannelName>) -> Vec<ChannelName> {
    let raw: Vec<String> = stored.iter().map(|c| c.as_str().to_string()).collect();
    let fixed = normalize(&raw);
    if fixed != stored {
        error!(user = %username, stored = ?stored, "Stored subscription set violates invariants, repaired in memory");
    }
    fixed
}
