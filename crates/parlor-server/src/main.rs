//! # parlor-server
//!
//! Real-time multi-channel chat relay.
//!
//! This binary provides:
//! - **WebSocket sessions** (`/ws`) where participants join channels and chat
//! - **Presence tracking** with a live online count pushed to every client
//! - **Per-identity admission control** (validation, cooldown, membership)
//! - **Channel fan-out** to exactly the live subscribers of a channel
//! - **Push notifications** for subscribers who missed a message
//! - **REST API** (axum) for health, server info, and push registration

mod api;
mod auth;
mod config;
mod error;
mod gatekeeper;
mod presence;
mod push;
mod relay;
mod router;
mod session;
mod subscriptions;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use parlor_shared::constants::APP_NAME;
use parlor_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::push::{VapidKey, WebPushTransport};
use crate::relay::Relay;
use crate::subscriptions::SqliteUserStore;

/// How often idle rate-limit entries are swept, and how idle they must be.
const RATE_SWEEP_INTERVAL_SECS: u64 = 300;
const RATE_MAX_IDLE_MINUTES: i64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parlor_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = ?db.path(), "User database opened");
    let store = Arc::new(SqliteUserStore::new(db));
    let vapid = config.vapid_private_key.clone().map(|private_key| VapidKey {
        private_key,
        subject: config.vapid_subject.clone(),
    });
    if vapid.is_none() {
        warn!("VAPID_PRIVATE_KEY not set, push requests will be unsigned");
    }
    let transport = Arc::new(WebPushTransport::new(
        config.push_timeout,
        config.push_ttl_secs,
        vapid,
    )?);

    let relay = Relay::new(store, transport, config.message_cooldown);

    let app_state = AppState {
        relay: relay.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate state cleanup
    let gatekeeper = relay.gatekeeper.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(RATE_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let purged = gatekeeper
                .purge_idle(
                    chrono::Duration::minutes(RATE_MAX_IDLE_MINUTES),
                    chrono::Utc::now(),
                )
                .await;
            if purged > 0 {
                tracing::debug!(purged, "Evicted idle rate-limit entries");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
