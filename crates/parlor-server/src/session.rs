//! One task per live WebSocket.
//!
//! The socket is split: a writer task owns the sink and drains the
//! connection's event queue plus control frames, a heartbeat task pings the
//! client and flags it when pongs stop, and the reader loop below feeds
//! client frames to the relay one at a time, in receipt order.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parlor_shared::protocol::{ClientEvent, ServerEvent};
use parlor_shared::{ConnectionId, Identity};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::presence::Connection;
use crate::relay::Relay;

/// Everything one connection needs to act on client frames.
pub struct Session {
    relay: Relay,
    identity: Identity,
    connection: Connection,
}

impl Session {
    pub fn new(relay: Relay, identity: Identity, connection: Connection) -> Self {
        Self {
            relay,
            identity,
            connection,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub async fn open(&self) {
        self.relay
            .connect(&self.identity, self.connection.clone())
            .await;
    }

    /// Handle one text frame. Client mistakes are answered with an `error`
    /// event to this connection only; the connection stays open.
    pub async fn handle_frame(&self, frame: &str) {
        let event = match ClientEvent::parse(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!(identity = %self.identity, error = %e, "Unparseable client frame");
                self.reply_error("Malformed frame");
                return;
            }
        };

        match event {
            ClientEvent::SetChannels { channels } => {
                let channels = self.relay.set_channels(&self.identity, &channels).await;
                self.connection.send(ServerEvent::Channels { channels });
            }
            ClientEvent::ChatMessage { text, channel } => {
                if let Err(rejection) = self
                    .relay
                    .publish(&self.identity, channel.as_ref(), text.as_ref())
                    .await
                {
                    debug!(identity = %self.identity, reason = %rejection, "Message rejected");
                    self.reply_error(&rejection.to_string());
                }
            }
        }
    }

    pub fn reply_error(&self, reason: &str) {
        self.connection.send(ServerEvent::Error {
            reason: reason.to_string(),
        });
    }

    pub async fn close(&self) {
        self.relay.disconnect(self.connection.id()).await;
    }
}

/// Deregisters the connection if the session future is dropped before it
/// reaches its own cleanup (e.g. the server shutting down).
struct DisconnectGuard {
    relay: Option<Relay>,
    conn_id: ConnectionId,
}

impl DisconnectGuard {
    fn disarm(&mut self) {
        self.relay = None;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let Some(relay) = self.relay.take() else {
            return;
        };
        let conn_id = self.conn_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                relay.disconnect(conn_id).await;
            });
        }
    }
}

/// Liveness probing for one connection.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub pong_timeout: Duration,
}

/// Drive one upgraded WebSocket until either side goes away or the client
/// stops answering pings.
pub async fn run_connection(
    socket: WebSocket,
    relay: Relay,
    identity: Identity,
    heartbeat: Heartbeat,
) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<WsMessage>();

    let session = Session::new(relay.clone(), identity.clone(), Connection::new(event_tx));
    let conn_id = session.connection_id();
    let mut guard = DisconnectGuard {
        relay: Some(relay),
        conn_id,
    };

    let writer_handle = tokio::spawn(writer_task(ws_sender, event_rx, control_rx));

    session.open().await;
    info!(identity = %identity, connection = %conn_id, "Session started");

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let unresponsive = CancellationToken::new();
    let ping_handle = tokio::spawn(heartbeat_task(
        control_tx.clone(),
        pong_rx,
        heartbeat,
        conn_id,
        unresponsive.clone(),
    ));

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = unresponsive.cancelled() => {
                info!(connection = %conn_id, "Client stopped answering pings, dropping session");
                break;
            }
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => session.handle_frame(&text).await,
            Some(Ok(WsMessage::Binary(_))) => session.reply_error("Binary frames are not supported"),
            Some(Ok(WsMessage::Pong(data))) => {
                let _ = pong_tx.send(data);
            }
            Some(Ok(WsMessage::Ping(data))) => {
                let _ = control_tx.send(WsMessage::Pong(data));
            }
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(connection = %conn_id, reason = ?frame, "Client initiated close");
                break;
            }
            Some(Err(e)) => {
                warn!(connection = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        }
    }

    ping_handle.abort();
    writer_handle.abort();

    session.close().await;
    guard.disarm();

    info!(identity = %identity, connection = %conn_id, "Session ended");
}

/// Ping every `interval`; cancel `unresponsive` when a ping is not answered
/// with a matching pong within `pong_timeout`.
async fn heartbeat_task(
    control: mpsc::UnboundedSender<WsMessage>,
    mut pongs: mpsc::UnboundedReceiver<Vec<u8>>,
    heartbeat: Heartbeat,
    conn_id: ConnectionId,
    unresponsive: CancellationToken,
) {
    let mut ticker = interval(heartbeat.interval);
    ticker.tick().await;
    let mut sequence: u64 = 0;

    loop {
        ticker.tick().await;

        // Pongs nobody asked for must not answer the next ping.
        while pongs.try_recv().is_ok() {}

        sequence += 1;
        let expected = sequence.to_be_bytes().to_vec();
        if control.send(WsMessage::Ping(expected.clone())).is_err() {
            return;
        }

        let answered = timeout(heartbeat.pong_timeout, async {
            while let Some(data) = pongs.recv().await {
                if data == expected {
                    return true;
                }
            }
            false
        })
        .await;

        match answered {
            Ok(true) => {}
            // The reader is gone; it handles its own cleanup.
            Ok(false) => return,
            Err(_) => {
                warn!(connection = %conn_id, "Pong timeout, closing connection");
                let _ = control.send(WsMessage::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                unresponsive.cancel();
                return;
            }
        }
    }
}

/// Owns the sink; serializes queued events as JSON text frames.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, WsMessage>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<WsMessage>,
) {
    loop {
        let frame = tokio::select! {
            Some(frame) = control.recv() => frame,
            Some(event) = events.recv() => match event.to_json() {
                Ok(json) => WsMessage::Text(json),
                Err(e) => {
                    warn!(error = %e, "Dropping unserializable event");
                    continue;
                }
            },
            else => break,
        };

        let closing = matches!(frame, WsMessage::Close(_));
        if ws_sender.send(frame).await.is_err() || closing {
            break;
        }
    }
}
