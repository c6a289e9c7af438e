/// Chat client: wires the store, delivery engine and reconciliation pipeline
/// around one transport and exposes the command surface used by the UI.
use crate::config::Config;
use crate::delivery::{DeliveryEngine, PendingSendItem, RetryReport};
use crate::model::{ConnectionState, Conversation, ConversationSummary};
use crate::notify::{Notification, Notifier};
use crate::reconcile::{PipelineHandle, ReconciliationPipeline};
use crate::store::ConversationStore;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{info, warn};

pub struct ChatClient {
    /// Sender id used for outbound payloads
    pub client_id: String,
    transport: Arc<dyn Transport>,
    store: ConversationStore,
    notifier: Notifier,
    delivery: DeliveryEngine,
    pipeline: PipelineHandle,
    active: Arc<RwLock<Option<String>>>,
}

impl ChatClient {
    /// Build the client and start consuming the transport's streams.
    /// Must be called inside a tokio runtime.
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let client_id = config.resolve_client_id();
        let store = ConversationStore::new();
        let notifier = Notifier::new(config.notification_capacity);

        let delivery = DeliveryEngine::new(
            transport.clone(),
            store.clone(),
            notifier.clone(),
            config.id_scheme,
            config.bot_id.clone(),
            !config.start_offline,
        );
        let pipeline = ReconciliationPipeline::new(
            store.clone(),
            notifier.clone(),
            client_id.clone(),
            config.bot_id.clone(),
            config.id_scheme,
        )
        .spawn(transport.as_ref());

        info!("Created chat client {}", client_id);

        Self {
            client_id,
            transport,
            store,
            notifier,
            delivery,
            pipeline,
            active: Arc::new(RwLock::new(config.initial_conversation.clone())),
        }
    }

    /// `new` + `connect` + initial conversation
    pub async fn start(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let client = Self::new(config, transport);
        client.connect().await;
        if let Some(id) = &config.initial_conversation {
            client.create_conversation(id).await;
        }
        client
    }

    /// Connect the transport. Failure is reported as a notification, never
    /// as an error. Returns whether the channel is joined.
    pub async fn connect(&self) -> bool {
        match self.transport.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.notifier
                    .emit(Notification::ConnectFailed(e.to_string()));
                false
            }
        }
    }

    /// Send to the active conversation (or the first one when none is selected)
    pub async fn send(&self, text: &str) -> Option<String> {
        let Some(conversation_id) = self.resolve_active().await else {
            warn!("No conversation to send to");
            return None;
        };
        self.send_to(&conversation_id, text).await
    }

    pub async fn send_to(&self, conversation_id: &str, text: &str) -> Option<String> {
        self.delivery
            .send_user_message(text, conversation_id, &self.client_id)
            .await
    }

    pub async fn create_conversation(&self, conversation_id: &str) {
        self.store.create_conversation(conversation_id).await;
        let mut active = self.active.write().await;
        if active.is_none() {
            *active = Some(conversation_id.to_string());
        }
    }

    /// Make a conversation active and clear its unread count
    pub async fn select_conversation(&self, conversation_id: &str) {
        *self.active.write().await = Some(conversation_id.to_string());
        self.store.mark_read(conversation_id).await;
    }

    pub async fn mark_read(&self, conversation_id: &str) -> bool {
        self.store.mark_read(conversation_id).await
    }

    pub async fn active_conversation(&self) -> Option<String> {
        self.resolve_active().await
    }

    async fn resolve_active(&self) -> Option<String> {
        if let Some(id) = self.active.read().await.clone() {
            return Some(id);
        }
        self.store.snapshot().await.first().map(|c| c.id.clone())
    }

    /// Toggle the online simulation flag
    pub async fn set_online(&self, online: bool) -> Option<RetryReport> {
        self.delivery.on_network_status_changed(online).await
    }

    pub fn is_online(&self) -> bool {
        self.delivery.is_online()
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.store.get(conversation_id).await
    }

    pub async fn snapshot(&self) -> Vec<Conversation> {
        self.store.snapshot().await
    }

    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        self.store.summaries().await
    }

    pub async fn pending_len(&self) -> usize {
        self.delivery.pending_len().await
    }

    pub async fn pending_items(&self) -> Vec<PendingSendItem> {
        self.delivery.pending_items().await
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Vec<Conversation>> {
        self.store.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.connection_state()
    }

    /// Tear down the channel and stop consuming its streams.
    /// Pending queue entries are kept.
    pub fn shutdown(&self) {
        self.transport.disconnect();
        self.pipeline.abort();
        info!("Chat client {} stopped", self.client_id);
    }
}
