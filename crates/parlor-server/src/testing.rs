//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use parlor_shared::protocol::{PushEndpoint, PushKeys, PushPayload, ServerEvent};
use parlor_shared::ChannelName;
use parlor_store::StoreError;
use tokio::sync::mpsc;

use crate::presence::Connection;
use crate::push::{PushError, PushTransport};
use crate::subscriptions::UserRecordStore;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Vec<ChannelName>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn seed(&self, username: &str, channels: &[&str]) {
        let channels = channels
            .iter()
            .map(|c| ChannelName::parse(c).unwrap())
            .collect();
        self.records
            .lock()
            .unwrap()
            .insert(username.to_string(), channels);
    }

    pub fn stored(&self, username: &str) -> Option<Vec<ChannelName>> {
        self.records.lock().unwrap().get(username).cloned()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl UserRecordStore for MemoryStore {
    fn load_channels(&self, username: &str) -> Result<Option<Vec<ChannelName>>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".into()));
        }
        Ok(self.stored(username))
    }

    fn save_channels(&self, username: &str, channels: &[ChannelName]) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.records
            .lock()
            .unwrap()
            .insert(username.to_string(), channels.to_vec());
        Ok(())
    }
}

/// Records every push attempt as `(endpoint url, payload)`.
pub struct RecordingTransport {
    sent: mpsc::UnboundedSender<(String, PushPayload)>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, PushPayload)>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (Self { sent, fail: false }, rx)
    }

    pub fn failing() -> (Self, mpsc::UnboundedReceiver<(String, PushPayload)>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (Self { sent, fail: true }, rx)
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, endpoint: &PushEndpoint, payload: &PushPayload) -> Result<(), PushError> {
        let _ = self.sent.send((endpoint.endpoint.clone(), payload.clone()));
        if self.fail {
            return Err(PushError::Rejected(410));
        }
        Ok(())
    }
}

/// Receiver keys from the RFC 8291 worked example, so they are valid P-256
/// points that the encryption layer accepts.
pub const CLIENT_P256DH: &str =
    "BCVxsr7N_eNgVRqvHtD0zTZsEc6-VV-JvLexhqUzORcxaOzi6-AYWXvTBHm4bjyPjs7Vd8pZGH6SRpkNtoIAiw4";
pub const CLIENT_AUTH: &str = "BTBZMqHH6r4Tts7J_aSIgg";

/// A P-256 private scalar usable as a VAPID signing key.
pub const VAPID_PRIVATE: &str = "q1dXpw3UpT5VOmu_cf_v6ih07Aems3njxI-JWgLcM94";

pub fn endpoint(url: &str) -> PushEndpoint {
    PushEndpoint {
        endpoint: url.to_string(),
        keys: PushKeys {
            p256dh: CLIENT_P256DH.to_string(),
            auth: CLIENT_AUTH.to_string(),
        },
    }
}

pub fn connection() -> (Connection, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Connection::new(tx), rx)
}

/// Everything queued on a connection so far.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
