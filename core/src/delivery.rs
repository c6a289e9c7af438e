/// Delivery engine: optimistic send, offline queueing and retry-on-reconnect
///
/// Status flow for a locally originated message:
///
/// ```text
///   online send ok     SENDING ──(echo)──────────────▶ SENT
///   online send error  SENDING ─▶ QUEUED ─(retry ok, echo)─▶ SENT
///   offline            QUEUED ──(retry error)─▶ FAILED ─(retry ok, echo)─▶ SENT
/// ```
///
/// SENT is only ever set by the reconciliation pipeline when the echo arrives.
use crate::bot;
use crate::error::{Result, SyncError};
use crate::identity::IdScheme;
use crate::model::{Message, MessageOrigin, MessageStatus};
use crate::notify::{Notification, Notifier};
use crate::store::ConversationStore;
use crate::transport::{now_millis, ChatPayload, Transport};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An outbound payload that has not been acknowledged yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSendItem {
    /// Queue-local sequence number, unique even when message ids collide
    pub seq: u64,
    pub payload: ChatPayload,
    pub message_id: String,
    /// Failed retry passes so far
    pub attempts: u32,
}

/// Outcome of one pass over the pending queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    store: ConversationStore,
    notifier: Notifier,
    id_scheme: IdScheme,
    bot_id: String,
    online: Arc<AtomicBool>,
    pending: Arc<Mutex<VecDeque<PendingSendItem>>>,
    next_seq: Arc<AtomicU64>,
    /// Serializes retry passes
    retry_lock: Arc<Mutex<()>>,
}

impl DeliveryEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: ConversationStore,
        notifier: Notifier,
        id_scheme: IdScheme,
        bot_id: impl Into<String>,
        online: bool,
    ) -> Self {
        Self {
            transport,
            store,
            notifier,
            id_scheme,
            bot_id: bot_id.into(),
            online: Arc::new(AtomicBool::new(online)),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
            retry_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Pending queue contents in FIFO order
    pub async fn pending_items(&self) -> Vec<PendingSendItem> {
        self.pending.lock().await.iter().cloned().collect()
    }

    /// Send a user-entered text. Returns the derived message id, or `None`
    /// when the text was blank and nothing happened.
    pub async fn send_user_message(
        &self,
        text: &str,
        conversation_id: &str,
        client_id: &str,
    ) -> Option<String> {
        if let Err(e) = validate_text(text) {
            debug!("Ignoring outbound message: {}", e);
            return None;
        }

        let payload = ChatPayload::user_message(conversation_id, text, client_id, now_millis());
        let message_id = self.id_scheme.message_id(&payload);
        let online = self.is_online();
        let status = if online {
            MessageStatus::Sending
        } else {
            MessageStatus::Queued
        };

        // Optimistic insert before any network attempt
        self.store
            .upsert_local(Message {
                id: message_id.clone(),
                conversation_id: payload.conversation_id.clone(),
                text: payload.text.clone(),
                sender_id: payload.sender_id.clone(),
                timestamp: payload.timestamp,
                origin: MessageOrigin::Mine,
                status,
            })
            .await;

        if !online {
            info!(conversation_id, message_id = %message_id, "Offline, message queued");
            self.enqueue(payload, message_id.clone()).await;
            self.notifier.emit(Notification::QueuedOffline);
            return Some(message_id);
        }

        match self.transport.send(&payload).await {
            Ok(()) => {
                debug!(conversation_id, message_id = %message_id, "Message published");
                self.send_bot_reply(&payload).await;
            }
            Err(e) => {
                warn!(conversation_id, message_id = %message_id, "Send failed, queueing: {}", e);
                self.enqueue(payload, message_id.clone()).await;
                self.store
                    .update_status(conversation_id, &message_id, MessageStatus::Queued)
                    .await;
                self.notifier.emit(Notification::SendFailedQueued);
            }
        }

        Some(message_id)
    }

    /// Flip the online flag. Offline -> online drains the pending queue.
    pub async fn on_network_status_changed(&self, is_online: bool) -> Option<RetryReport> {
        let was_online = self.online.swap(is_online, Ordering::SeqCst);

        if was_online && !is_online {
            info!("Went offline");
            self.notifier.emit(Notification::WentOffline);
            return None;
        }

        if !was_online && is_online {
            info!("Back online, retrying pending messages");
            self.notifier.emit(Notification::BackOnline);
            return Some(self.retry_pending().await);
        }

        None
    }

    /// One FIFO pass over the queue as it was when the pass started.
    /// Successes leave the queue; failures stay and are marked FAILED.
    pub async fn retry_pending(&self) -> RetryReport {
        let _pass = self.retry_lock.lock().await;
        let batch = self.pending_items().await;
        let mut report = RetryReport::default();

        for item in batch {
            if !self.is_online() {
                debug!("Went offline mid-retry, stopping pass");
                break;
            }
            report.attempted += 1;

            match self.transport.send(&item.payload).await {
                Ok(()) => {
                    self.remove_pending(item.seq).await;
                    report.delivered += 1;
                    debug!(message_id = %item.message_id, "Retry delivered");
                    self.send_bot_reply(&item.payload).await;
                }
                Err(e) => {
                    let attempts = self.record_failed_attempt(item.seq).await;
                    warn!(
                        message_id = %item.message_id,
                        attempts,
                        "Retry failed: {}", e
                    );
                    self.store
                        .update_status(
                            &item.payload.conversation_id,
                            &item.message_id,
                            MessageStatus::Failed,
                        )
                        .await;
                    self.notifier.emit(Notification::RetryFailed);
                    report.failed += 1;
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                delivered = report.delivered,
                failed = report.failed,
                "Retry pass finished"
            );
        }
        report
    }

    async fn enqueue(&self, payload: ChatPayload, message_id: String) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().await.push_back(PendingSendItem {
            seq,
            payload,
            message_id,
            attempts: 0,
        });
    }

    async fn remove_pending(&self, seq: u64) {
        let mut pending = self.pending.lock().await;
        if let Some(idx) = pending.iter().position(|p| p.seq == seq) {
            pending.remove(idx);
        }
    }

    async fn record_failed_attempt(&self, seq: u64) -> u32 {
        let mut pending = self.pending.lock().await;
        match pending.iter_mut().find(|p| p.seq == seq) {
            Some(item) => {
                item.attempts += 1;
                item.attempts
            }
            None => 0,
        }
    }

    /// Bot reply failures never touch the user message's state
    async fn send_bot_reply(&self, user_payload: &ChatPayload) {
        let reply = bot::reply_payload(user_payload, &self.bot_id, now_millis());
        if let Err(e) = self.transport.send(&reply).await {
            warn!(conversation_id = %reply.conversation_id, "Bot reply failed: {}", e);
            self.notifier.emit(Notification::BotReplyFailed);
        }
    }
}

fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(SyncError::Validation("message text is blank".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoopbackTransport, PayloadKind};
    use tokio::sync::broadcast;

    struct Harness {
        transport: Arc<LoopbackTransport>,
        store: ConversationStore,
        engine: DeliveryEngine,
        notes: broadcast::Receiver<Notification>,
    }

    async fn harness(online: bool) -> Harness {
        let transport = Arc::new(LoopbackTransport::default());
        transport.set_echo(false);
        transport.connect().await.unwrap();
        let store = ConversationStore::new();
        let notifier = Notifier::new(32);
        let notes = notifier.subscribe();
        let engine = DeliveryEngine::new(
            transport.clone(),
            store.clone(),
            notifier,
            IdScheme::Legacy,
            "BOT",
            online,
        );
        Harness {
            transport,
            store,
            engine,
            notes,
        }
    }

    async fn status_of(store: &ConversationStore, conv: &str, id: &str) -> MessageStatus {
        store.get(conv).await.unwrap().get(id).unwrap().status
    }

    #[tokio::test]
    async fn test_blank_text_is_ignored() {
        let h = harness(true).await;
        for text in ["", "   ", "\n\t"] {
            assert!(h.engine.send_user_message(text, "c", "me").await.is_none());
        }
        assert_eq!(h.engine.pending_len().await, 0);
        assert!(h.store.snapshot().await.is_empty());
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_online_send_publishes_user_then_bot() {
        let h = harness(true).await;
        let id = h.engine.send_user_message("hello", "c", "me").await.unwrap();

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, PayloadKind::UserMessage);
        assert_eq!(sent[1].kind, PayloadKind::BotMessage);
        assert_eq!(sent[1].text, bot::GREETING_REPLY);
        assert_eq!(sent[1].sender_id, "BOT");

        // status waits for the echo
        assert_eq!(status_of(&h.store, "c", &id).await, MessageStatus::Sending);
        assert_eq!(h.engine.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_offline_send_queues_without_network() {
        let mut h = harness(false).await;
        let a = h.engine.send_user_message("one", "c", "me").await.unwrap();
        let b = h.engine.send_user_message("two", "c", "me").await.unwrap();

        assert!(h.transport.sent().is_empty());
        assert_eq!(status_of(&h.store, "c", &a).await, MessageStatus::Queued);
        assert_eq!(status_of(&h.store, "c", &b).await, MessageStatus::Queued);

        let pending = h.engine.pending_items().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].message_id, a);
        assert_eq!(pending[1].message_id, b);
        assert_eq!(h.notes.recv().await.unwrap(), Notification::QueuedOffline);
    }

    #[tokio::test]
    async fn test_send_failure_queues_message() {
        let mut h = harness(true).await;
        h.transport.fail_next_sends(1);
        let id = h.engine.send_user_message("hi", "c", "me").await.unwrap();

        assert_eq!(status_of(&h.store, "c", &id).await, MessageStatus::Queued);
        assert_eq!(h.engine.pending_len().await, 1);
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.notes.recv().await.unwrap(), Notification::SendFailedQueued);
    }

    #[tokio::test]
    async fn test_reconnect_drains_in_fifo_order() {
        let h = harness(false).await;
        let ids = [
            h.engine.send_user_message("first", "c", "me").await.unwrap(),
            h.engine.send_user_message("second", "c", "me").await.unwrap(),
            h.engine.send_user_message("third", "d", "me").await.unwrap(),
        ];

        let report = h.engine.on_network_status_changed(true).await.unwrap();
        assert_eq!(report, RetryReport { attempted: 3, delivered: 3, failed: 0 });
        assert_eq!(h.engine.pending_len().await, 0);

        let users: Vec<String> = h
            .transport
            .sent()
            .into_iter()
            .filter(|p| p.kind == PayloadKind::UserMessage)
            .map(|p| p.text)
            .collect();
        assert_eq!(users, vec!["first", "second", "third"]);
        // one bot reply per delivered message
        assert_eq!(h.transport.sent().len(), 6);
        // still QUEUED until the echo lands
        assert_eq!(status_of(&h.store, "d", &ids[2]).await, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn test_retry_failure_keeps_item_and_marks_failed() {
        let h = harness(false).await;
        let id = h.engine.send_user_message("stuck", "c", "me").await.unwrap();
        h.transport.set_fail_all(true);

        let report = h.engine.on_network_status_changed(true).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(status_of(&h.store, "c", &id).await, MessageStatus::Failed);
        let pending = h.engine.pending_items().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);

        // every later online transition tries again
        h.engine.on_network_status_changed(false).await;
        h.engine.on_network_status_changed(true).await;
        assert_eq!(h.engine.pending_items().await[0].attempts, 2);

        h.transport.set_fail_all(false);
        h.engine.on_network_status_changed(false).await;
        let report = h.engine.on_network_status_changed(true).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(h.engine.pending_len().await, 0);
    }

    #[tokio::test]
    async fn test_partial_retry_failure() {
        let h = harness(false).await;
        let a = h.engine.send_user_message("a", "c", "me").await.unwrap();
        let b = h.engine.send_user_message("b", "c", "me").await.unwrap();
        let c = h.engine.send_user_message("c", "c", "me").await.unwrap();
        h.transport.set_fail_text(Some("b".to_string()));

        let report = h.engine.on_network_status_changed(true).await.unwrap();
        assert_eq!(report, RetryReport { attempted: 3, delivered: 2, failed: 1 });

        let pending = h.engine.pending_items().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message_id, b);
        assert_eq!(status_of(&h.store, "c", &b).await, MessageStatus::Failed);
        assert_eq!(status_of(&h.store, "c", &a).await, MessageStatus::Queued);
        assert_eq!(status_of(&h.store, "c", &c).await, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn test_going_offline_notifies_once() {
        let mut h = harness(true).await;
        assert!(h.engine.on_network_status_changed(false).await.is_none());
        assert!(h.engine.on_network_status_changed(false).await.is_none());
        assert_eq!(h.notes.recv().await.unwrap(), Notification::WentOffline);
        assert!(h.notes.try_recv().is_err());
        assert!(!h.engine.is_online());
    }

    #[tokio::test]
    async fn test_bot_reply_failure_does_not_requeue() {
        let mut h = harness(true).await;
        h.transport.set_fail_text(Some("You said: \"pizza\"".to_string()));

        let id = h.engine.send_user_message("pizza", "c", "me").await.unwrap();

        assert_eq!(h.transport.sent().len(), 1);
        assert_eq!(h.engine.pending_len().await, 0);
        assert_eq!(status_of(&h.store, "c", &id).await, MessageStatus::Sending);
        assert_eq!(h.notes.recv().await.unwrap(), Notification::BotReplyFailed);
    }

    #[tokio::test]
    async fn test_colliding_ids_are_tracked_separately() {
        let h = harness(false).await;
        // same sender, text and millisecond: one message, two queue entries
        let payload = ChatPayload::user_message("c", "twice", "me", 1000);
        let id = IdScheme::Legacy.message_id(&payload);
        h.engine.enqueue(payload.clone(), id.clone()).await;
        h.engine.enqueue(payload, id.clone()).await;
        h.transport.set_fail_all(true);

        let report = h.engine.on_network_status_changed(true).await.unwrap();
        assert_eq!(report.failed, 2);
        let pending = h.engine.pending_items().await;
        assert_eq!(pending.len(), 2);
        assert_ne!(pending[0].seq, pending[1].seq);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[1].attempts, 1);

        h.transport.set_fail_all(false);
        let report = h.engine.retry_pending().await;
        assert_eq!(report.delivered, 2);
        assert_eq!(h.engine.pending_len().await, 0);
    }
}
