/// Transport client seam and implementations
pub mod frame;
pub mod loopback;
pub mod payload;
pub mod tcp;

pub use frame::RelayFrame;
pub use loopback::LoopbackTransport;
pub use payload::{now_millis, ChatPayload, PayloadKind};
pub use tcp::TcpTransport;

use crate::error::Result;
use crate::model::ConnectionState;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};

/// Channel client consumed by the delivery engine and reconciliation pipeline
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the channel session. Idempotent once connected.
    async fn connect(&self) -> Result<()>;

    /// Best-effort teardown; resets state to `Disconnected`
    fn disconnect(&self);

    /// Publish one payload. Fails with `SyncError::Send` when not joined.
    async fn send(&self, payload: &ChatPayload) -> Result<()>;

    /// Decoded application events, in arrival order. Every subscriber sees
    /// every event; nothing is dropped for a slow consumer.
    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ChatPayload>;

    /// Transport-level notices (parse failures etc.)
    fn subscribe_errors(&self) -> broadcast::Receiver<String>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self) -> Result<()> {
        (**self).connect().await
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    async fn send(&self, payload: &ChatPayload) -> Result<()> {
        (**self).send(payload).await
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ChatPayload> {
        (**self).subscribe_events()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        (**self).subscribe_errors()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        (**self).connection_state()
    }
}

/// Lossless event fan-out: one unbounded queue per subscriber
#[derive(Clone, Default)]
pub(crate) struct EventFanout {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ChatPayload>>>>,
}

impl EventFanout {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Deliver to every live subscriber; dropped receivers are pruned
    pub(crate) fn publish(&self, payload: ChatPayload) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(payload.clone()).is_ok());
        }
    }
}

/// Decode a raw event body and fan it out. Malformed bodies become an error
/// notice instead of a payload.
pub(crate) fn dispatch_raw(raw: &str, events: &EventFanout, errors: &broadcast::Sender<String>) {
    match ChatPayload::from_json(raw) {
        Ok(payload) => {
            tracing::debug!(%payload, "Inbound event");
            events.publish(payload);
        }
        Err(e) => {
            tracing::warn!("Dropping malformed payload: {}", e);
            let _ = errors.send(format!("Failed to parse payload: {}", raw));
        }
    }
}
