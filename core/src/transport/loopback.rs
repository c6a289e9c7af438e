/// In-process transport that echoes published payloads back as inbound events
///
/// Used for offline demos and as the test double for the delivery engine.
/// Supports failure injection for connect and send.
use super::{dispatch_raw, ChatPayload, EventFanout, Transport};
use crate::error::{Result, SyncError};
use crate::model::ConnectionState;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

pub struct LoopbackTransport {
    events: EventFanout,
    errors: broadcast::Sender<String>,
    state: watch::Sender<ConnectionState>,
    joined: AtomicBool,
    echo: AtomicBool,
    fail_all: AtomicBool,
    fail_next: AtomicUsize,
    fail_text: Mutex<Option<String>>,
    connect_failure: Mutex<Option<String>>,
    sent: Mutex<Vec<ChatPayload>>,
}

impl LoopbackTransport {
    /// `capacity` bounds the transport notice buffer
    pub fn new(capacity: usize) -> Self {
        let (errors, _) = broadcast::channel(capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            events: EventFanout::default(),
            errors,
            state,
            joined: AtomicBool::new(false),
            echo: AtomicBool::new(true),
            fail_all: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            fail_text: Mutex::new(None),
            connect_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Echo successful sends back as inbound events (default on)
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    /// Fail the next `n` sends
    pub fn fail_next_sends(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every send until reset
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Fail every send whose text equals `text`
    pub fn set_fail_text(&self, text: Option<String>) {
        if let Ok(mut guard) = self.fail_text.lock() {
            *guard = text;
        }
    }

    /// Make `connect` fail with the given reason
    pub fn fail_connect_with(&self, reason: Option<String>) {
        if let Ok(mut guard) = self.connect_failure.lock() {
            *guard = reason;
        }
    }

    /// Every payload that was successfully published, in order
    pub fn sent(&self) -> Vec<ChatPayload> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Deliver a payload as if another participant had published it
    pub fn inject(&self, payload: ChatPayload) {
        self.events.publish(payload);
    }

    /// Deliver a raw event body; malformed bodies surface as error notices
    pub fn inject_raw(&self, raw: &str) {
        dispatch_raw(raw, &self.events, &self.errors);
    }

    /// Force a connection state, e.g. to simulate a channel error
    pub fn set_state(&self, state: ConnectionState) {
        let joined = state == ConnectionState::Connected;
        self.joined.store(joined, Ordering::SeqCst);
        self.state.send_replace(state);
    }

    fn take_failure(&self, payload: &ChatPayload) -> bool {
        if self.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        let text_matches = self
            .fail_text
            .lock()
            .map(|g| g.as_deref() == Some(payload.text.as_str()))
            .unwrap_or(false);
        if text_matches {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        if self.joined.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.state.send_replace(ConnectionState::Connecting);

        let failure = self.connect_failure.lock().ok().and_then(|g| g.clone());
        if let Some(reason) = failure {
            self.state.send_replace(ConnectionState::Error(reason.clone()));
            return Err(SyncError::Connection(reason));
        }

        self.joined.store(true, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Connected);
        info!("Loopback channel joined");
        Ok(())
    }

    fn disconnect(&self) {
        self.joined.store(false, Ordering::SeqCst);
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn send(&self, payload: &ChatPayload) -> Result<()> {
        if !self.joined.load(Ordering::SeqCst) {
            return Err(SyncError::Send("channel not joined".to_string()));
        }
        if self.take_failure(payload) {
            return Err(SyncError::Send("injected publish failure".to_string()));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload.clone());
        }
        debug!(%payload, "Loopback published");

        if self.echo.load(Ordering::SeqCst) {
            self.events.publish(payload.clone());
        }
        Ok(())
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ChatPayload> {
        self.events.subscribe()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(64)
    }
}
