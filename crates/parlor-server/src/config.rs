//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderName;
use parlor_shared::constants::{DEFAULT_HTTP_PORT, MESSAGE_COOLDOWN_MS};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// SQLite file holding the user records.
    /// Env: `DATABASE_PATH`
    /// Default: `./parlor.db`
    pub database_path: PathBuf,

    /// Header the trusted auth layer sets to the authenticated username.
    /// Requests without it are treated as guests.
    /// Env: `IDENTITY_HEADER`
    /// Default: `x-authenticated-user`
    pub identity_header: HeaderName,

    /// Minimum spacing between two accepted messages from one identity.
    /// Env: `MESSAGE_COOLDOWN_MS`
    /// Default: `3000`
    pub message_cooldown: Duration,

    /// Request timeout for the push service.
    /// Env: `PUSH_TIMEOUT_SECS`
    /// Default: `10`
    pub push_timeout: Duration,

    /// How long the push service should hold an undelivered notification.
    /// Env: `PUSH_TTL_SECS`
    /// Default: `86400`
    pub push_ttl_secs: u64,

    /// Application server key handed to clients before they subscribe.
    /// Env: `VAPID_PUBLIC_KEY`
    /// Default: unset (`GET /push/key` answers 404).
    pub vapid_public_key: Option<String>,

    /// Private half of the VAPID key pair (raw P-256 scalar, base64url),
    /// used to sign every push request.
    /// Env: `VAPID_PRIVATE_KEY`
    /// Default: unset (push requests go out unsigned).
    pub vapid_private_key: Option<String>,

    /// Contact URI placed in the VAPID `sub` claim.
    /// Env: `VAPID_SUBJECT`
    /// Default: unset.
    pub vapid_subject: Option<String>,

    /// Interval between server pings on idle connections.
    /// Env: `HEARTBEAT_INTERVAL_SECS`
    /// Default: `30`
    pub heartbeat_interval: Duration,

    /// How long a ping may go unanswered before the connection is dropped.
    /// Env: `PONG_TIMEOUT_SECS`
    /// Default: `10`
    pub pong_timeout: Duration,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("identity_header", &self.identity_header)
            .field("message_cooldown", &self.message_cooldown)
            .field("push_timeout", &self.push_timeout)
            .field("push_ttl_secs", &self.push_ttl_secs)
            .field("vapid_public_key", &self.vapid_public_key)
            .field(
                "vapid_private_key",
                &self.vapid_private_key.as_ref().map(|_| "<redacted>"),
            )
            .field("vapid_subject", &self.vapid_subject)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("pong_timeout", &self.pong_timeout)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parlor.db"),
            identity_header: HeaderName::from_static("x-authenticated-user"),
            message_cooldown: Duration::from_millis(MESSAGE_COOLDOWN_MS),
            push_timeout: Duration::from_secs(10),
            push_ttl_secs: 86_400,
            vapid_public_key: None,
            vapid_private_key: None,
            vapid_subject: None,
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(name) = lookup("IDENTITY_HEADER") {
            match HeaderName::try_from(name.trim().to_ascii_lowercase()) {
                Ok(header) => config.identity_header = header,
                Err(_) => tracing::warn!(value = %name, "Invalid IDENTITY_HEADER, using default"),
            }
        }

        if let Some(ms) = parse_u64(&lookup, "MESSAGE_COOLDOWN_MS") {
            config.message_cooldown = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_u64(&lookup, "PUSH_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.push_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_u64(&lookup, "PUSH_TTL_SECS") {
            config.push_ttl_secs = secs;
        }

        config.vapid_public_key = non_empty(&lookup, "VAPID_PUBLIC_KEY");
        config.vapid_private_key = non_empty(&lookup, "VAPID_PRIVATE_KEY");
        config.vapid_subject = non_empty(&lookup, "VAPID_SUBJECT");

        if let Some(secs) = parse_u64(&lookup, "HEARTBEAT_INTERVAL_SECS").filter(|s| *s > 0) {
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_u64(&lookup, "PONG_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.pong_timeout = Duration::from_secs(secs);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid numeric setting, using default");
            None
        }
    }
}
