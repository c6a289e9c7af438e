/// Reconciliation pipeline: transport streams -> conversation store + notifications
///
/// Three independent consumers: inbound events, connection state and
/// transport notices. Each preserves its own stream's order; there is no
/// ordering between them.
use crate::identity::IdScheme;
use crate::model::{ConnectionState, Message, MessageOrigin, MessageStatus};
use crate::notify::{Notification, Notifier};
use crate::store::ConversationStore;
use crate::transport::{ChatPayload, PayloadKind, Transport};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ReconciliationPipeline {
    store: ConversationStore,
    notifier: Notifier,
    client_id: String,
    bot_id: String,
    id_scheme: IdScheme,
}

/// Running consumer tasks
pub struct PipelineHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

impl ReconciliationPipeline {
    pub fn new(
        store: ConversationStore,
        notifier: Notifier,
        client_id: impl Into<String>,
        bot_id: impl Into<String>,
        id_scheme: IdScheme,
    ) -> Self {
        Self {
            store,
            notifier,
            client_id: client_id.into(),
            bot_id: bot_id.into(),
            id_scheme,
        }
    }

    /// Who sent a payload, from this client's point of view
    pub fn classify(&self, payload: &ChatPayload) -> MessageOrigin {
        let is_bot = payload.sender_id == self.bot_id || payload.kind == PayloadKind::BotMessage;
        if is_bot {
            MessageOrigin::Bot
        } else if payload.sender_id == self.client_id {
            MessageOrigin::Mine
        } else {
            MessageOrigin::Other
        }
    }

    /// Merge one inbound payload as a delivered message. Returns true when
    /// the id was new to its conversation.
    pub async fn handle_payload(&self, payload: ChatPayload) -> bool {
        let origin = self.classify(&payload);
        let message = Message {
            id: self.id_scheme.message_id(&payload),
            conversation_id: payload.conversation_id,
            text: payload.text,
            sender_id: payload.sender_id,
            timestamp: payload.timestamp,
            origin,
            status: MessageStatus::Sent,
        };
        debug!(
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            ?origin,
            "Reconciling inbound message"
        );
        let is_mine = message.is_mine();
        self.store.merge_inbound(message, is_mine).await
    }

    pub fn handle_connection_state(&self, state: &ConnectionState) {
        info!("Connection state: {}", state);
        if let ConnectionState::Error(reason) = state {
            self.notifier
                .emit(Notification::ConnectionError(reason.clone()));
        }
    }

    pub fn handle_transport_error(&self, message: String) {
        warn!("Transport notice: {}", message);
        self.notifier.emit(Notification::Transport(message));
    }

    /// Subscribe to all three transport streams and consume them on
    /// separate tasks. Subscriptions are taken before returning, so nothing
    /// published afterwards is missed.
    pub fn spawn(&self, transport: &dyn Transport) -> PipelineHandle {
        let mut events = transport.subscribe_events();
        let mut errors = transport.subscribe_errors();
        let mut states = transport.connection_state();

        let pipeline = self.clone();
        let events_task = tokio::spawn(async move {
            while let Some(payload) = events.recv().await {
                pipeline.handle_payload(payload).await;
            }
            debug!("Inbound event stream closed");
        });

        let pipeline = self.clone();
        let errors_task = tokio::spawn(async move {
            loop {
                match errors.recv().await {
                    Ok(message) => pipeline.handle_transport_error(message),
                    Err(RecvError::Lagged(n)) => warn!("Skipped {} transport notices", n),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let pipeline = self.clone();
        let states_task = tokio::spawn(async move {
            loop {
                let state = states.borrow_and_update().clone();
                pipeline.handle_connection_state(&state);
                if states.changed().await.is_err() {
                    break;
                }
            }
        });

        PipelineHandle {
            tasks: vec![events_task, errors_task, states_task],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    fn pipeline() -> (ReconciliationPipeline, ConversationStore, Notifier) {
        let store = ConversationStore::new();
        let notifier = Notifier::new(16);
        let p = ReconciliationPipeline::new(
            store.clone(),
            notifier.clone(),
            "me",
            "BOT",
            IdScheme::Legacy,
        );
        (p, store, notifier)
    }

    #[test]
    fn test_classify() {
        let (p, _, _) = pipeline();
        assert_eq!(p.classify(&ChatPayload::user_message("c", "x", "me", 1)), MessageOrigin::Mine);
        assert_eq!(p.classify(&ChatPayload::user_message("c", "x", "bob", 1)), MessageOrigin::Other);
        assert_eq!(p.classify(&ChatPayload::user_message("c", "x", "BOT", 1)), MessageOrigin::Bot);
        // bot type wins even when the sender looks like us
        assert_eq!(p.classify(&ChatPayload::bot_message("c", "x", "me", 1)), MessageOrigin::Bot);
    }

    #[tokio::test]
    async fn test_inbound_is_forced_to_sent() {
        let (p, store, _) = pipeline();
        assert!(p.handle_payload(ChatPayload::user_message("c", "yo", "bob", 5)).await);

        let conv = store.get("c").await.unwrap();
        assert_eq!(conv.messages[0].status, MessageStatus::Sent);
        assert_eq!(conv.messages[0].id, "bob-5-3862");
        assert_eq!(conv.unread_count, 1);
    }

    #[tokio::test]
    async fn test_identical_payloads_merge_once() {
        let (p, store, _) = pipeline();
        let payload = ChatPayload::user_message("c", "same", "bob", 9);
        assert!(p.handle_payload(payload.clone()).await);
        assert!(!p.handle_payload(payload).await);

        let conv = store.get("c").await.unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.unread_count, 1);
    }

    #[tokio::test]
    async fn test_spawned_consumers() {
        let (p, store, notifier) = pipeline();
        let mut notes = notifier.subscribe();
        let transport = LoopbackTransport::default();
        let _handle = p.spawn(&transport);

        transport.inject(ChatPayload::bot_message("c", "hi", "BOT", 1));
        transport.inject_raw("{broken");
        transport.set_state(ConnectionState::Error("socket closed".to_string()));

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let note = timeout(Duration::from_secs(1), notes.recv()).await.unwrap().unwrap();
            seen.push(note);
        }
        assert!(seen.contains(&Notification::Transport("Failed to parse payload: {broken".to_string())));
        assert!(seen.contains(&Notification::ConnectionError("socket closed".to_string())));

        let mut snapshots = store.subscribe();
        timeout(Duration::from_secs(1), async {
            loop {
                if snapshots.borrow_and_update().iter().any(|c| c.id == "c") {
                    break;
                }
                snapshots.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(store.get("c").await.unwrap().unread_count, 1);
    }
}
