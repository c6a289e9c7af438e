/// User-facing notifications (toasts)
///
/// Fire-and-forget: publishing never blocks, slow receivers lose the oldest
/// entries, and having no receivers at all is fine.
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum Notification {
    ConnectFailed(String),
    ConnectionError(String),
    QueuedOffline,
    SendFailedQueued,
    WentOffline,
    BackOnline,
    RetryFailed,
    BotReplyFailed,
    /// Transport-level notice forwarded verbatim
    Transport(String),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::ConnectFailed(reason) => {
                write!(f, "Failed to connect to server: {}", reason)
            }
            Notification::ConnectionError(reason) => write!(f, "Connection error: {}", reason),
            Notification::QueuedOffline => write!(f, "You are offline. Message queued."),
            Notification::SendFailedQueued => {
                write!(f, "Failed to send. Message queued for retry.")
            }
            Notification::WentOffline => {
                write!(f, "No internet connection. Messages will be queued.")
            }
            Notification::BackOnline => write!(f, "Back online. Retrying queued messages..."),
            Notification::RetryFailed => {
                write!(f, "Retry failed for a message. Will try again later.")
            }
            Notification::BotReplyFailed => write!(f, "Bot reply could not be sent."),
            Notification::Transport(msg) => write!(f, "{}", msg),
        }
    }
}

/// Broadcast publisher for notifications
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, notification: Notification) {
        debug!(%notification, "notification");
        // Err only means nobody is listening
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}
