/// chatsync - realtime chat client with offline queueing
///
/// Optimistic sends, a FIFO pending queue retried on reconnect, a local
/// echo bot and an idempotent merge of inbound events into per-conversation
/// history. Transports plug in behind the `Transport` trait.

pub mod error;
pub mod config;
pub mod model;
pub mod identity;
pub mod bot;
pub mod notify;
pub mod store;
pub mod delivery;
pub mod reconcile;
pub mod transport;
pub mod relay;
pub mod client;
pub mod cli_app;

pub use error::{Result, SyncError};
pub use config::{Config, RelayConfig};
pub use client::ChatClient;
pub use delivery::{DeliveryEngine, PendingSendItem, RetryReport};
pub use identity::IdScheme;
pub use model::{ConnectionState, Conversation, ConversationSummary, Message, MessageOrigin, MessageStatus};
pub use notify::{Notification, Notifier};
pub use reconcile::ReconciliationPipeline;
pub use relay::Relay;
pub use store::ConversationStore;
pub use transport::{ChatPayload, LoopbackTransport, PayloadKind, TcpTransport, Transport};
