use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{Method, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use parlor_shared::constants::{DEFAULT_CHANNEL, MAX_MESSAGE_CHARS};
use parlor_shared::protocol::PushEndpoint;
use parlor_shared::Identity;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::ResolvedIdentity;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::push::PushError;
use crate::relay::Relay;
use crate::session::{self, Heartbeat};

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/presence/:username", get(user_presence))
        .route("/ws", get(ws_upgrade))
        .route("/push/key", get(push_key))
        .route("/push/subscribe", post(push_subscribe))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    version: &'static str,
    online: usize,
    default_channel: &'static str,
    max_message_chars: usize,
    cooldown_ms: u64,
}

#[derive(Serialize)]
struct PresenceResponse {
    username: String,
    online: bool,
}

#[derive(Serialize)]
struct PushKeyResponse {
    public_key: String,
}

#[derive(Serialize)]
struct PushSubscribeResponse {
    registered: bool,
    replaced: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        online: state.relay.presence.online_count().await,
        default_channel: DEFAULT_CHANNEL,
        max_message_chars: MAX_MESSAGE_CHARS,
        cooldown_ms: state.config.message_cooldown.as_millis() as u64,
    })
}

/// GET /presence/:username -- whether `username` has a live connection.
async fn user_presence(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Json<PresenceResponse> {
    let online = state.relay.presence.is_online(&Identity::user(username.clone())).await;
    Json(PresenceResponse { username, online })
}

/// GET /ws -- upgrade to a chat session for the resolved identity.
async fn ws_upgrade(
    State(state): State<AppState>,
    ResolvedIdentity(identity): ResolvedIdentity,
    ws: WebSocketUpgrade,
) -> Response {
    info!(identity = %identity, authenticated = identity.is_authenticated(), "WebSocket upgrade");
    let heartbeat = Heartbeat {
        interval: state.config.heartbeat_interval,
        pong_timeout: state.config.pong_timeout,
    };
    ws.on_upgrade(move |socket| session::run_connection(socket, state.relay, identity, heartbeat))
}

async fn push_key(State(state): State<AppState>) -> Result<Json<PushKeyResponse>, ServerError> {
    let (Some(public_key), Some(_)) = (
        state.config.vapid_public_key.clone(),
        state.config.vapid_private_key.as_ref(),
    ) else {
        return Err(ServerError::NotFound("Push is not configured".into()));
    };
    Ok(Json(PushKeyResponse { public_key }))
}

/// POST /push/subscribe -- remember the caller's push endpoint.
async fn push_subscribe(
    State(state): State<AppState>,
    ResolvedIdentity(identity): ResolvedIdentity,
    Json(endpoint): Json<PushEndpoint>,
) -> Result<(StatusCode, Json<PushSubscribeResponse>), ServerError> {
    let replaced = state
        .relay
        .push
        .register(&identity, endpoint)
        .await
        .map_err(|e| match e {
            PushError::Unauthenticated => ServerError::Unauthorized(e.to_string()),
            other => ServerError::BadRequest(other.to_string()),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(PushSubscribeResponse {
            registered: true,
            replaced,
        }),
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
