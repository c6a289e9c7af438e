/// Conversation store: canonical in-memory map of conversation id -> conversation
///
/// Every mutation holds the write lock for its whole read-modify-write and
/// publishes the new snapshot before releasing it, so observers never see a
/// half-applied change.
use crate::model::{Conversation, ConversationSummary, Message, MessageStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, trace};

/// Conversations in insertion order with an id index
#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        let idx = *self.index.get(id)?;
        self.conversations.get_mut(idx)
    }

    fn get_or_create(&mut self, id: &str) -> &mut Conversation {
        let idx = match self.index.get(id) {
            Some(idx) => *idx,
            None => {
                self.conversations.push(Conversation::new(id));
                let idx = self.conversations.len() - 1;
                self.index.insert(id.to_string(), idx);
                debug!(conversation_id = %id, "Created conversation");
                idx
            }
        };
        &mut self.conversations[idx]
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<RwLock<Inner>>,
    snapshots: Arc<watch::Sender<Vec<Conversation>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            snapshots: Arc::new(tx),
        }
    }

    /// Receive the full snapshot every time it changes
    pub fn subscribe(&self) -> watch::Receiver<Vec<Conversation>> {
        self.snapshots.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(inner.conversations.clone());
    }

    /// Insert an empty conversation. No-op if it already exists.
    pub async fn create_conversation(&self, id: &str) {
        let mut inner = self.inner.write().await;
        if inner.index.contains_key(id) {
            return;
        }
        inner.get_or_create(id);
        self.publish(&inner);
    }

    /// Insert or replace a locally originated message. Never touches unread.
    pub async fn upsert_local(&self, message: Message) {
        let mut inner = self.inner.write().await;
        let conv = inner.get_or_create(&message.conversation_id);
        conv.last_message = Some(message.clone());
        conv.upsert(message);
        self.publish(&inner);
    }

    /// Insert or replace an inbound message. Unread goes up by one only for a
    /// new id that is not ours. Returns true when the id was new.
    pub async fn merge_inbound(&self, message: Message, is_mine: bool) -> bool {
        let mut inner = self.inner.write().await;
        let conv = inner.get_or_create(&message.conversation_id);
        let message_id = message.id.clone();
        conv.last_message = Some(message.clone());
        let is_new = conv.upsert(message);
        if is_new && !is_mine {
            conv.unread_count += 1;
        }
        trace!(
            conversation_id = %conv.id,
            message_id = %message_id,
            is_new,
            unread = conv.unread_count,
            "Merged inbound message"
        );
        self.publish(&inner);
        is_new
    }

    /// Replace a message's status in place. Returns false if not found.
    pub async fn update_status(
        &self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> bool {
        let mut inner = self.inner.write().await;
        let Some(conv) = inner.get_mut(conversation_id) else {
            return false;
        };
        let Some(idx) = conv.position(message_id) else {
            return false;
        };
        conv.messages[idx].status = status;
        conv.last_message = conv.messages.last().cloned();
        self.publish(&inner);
        true
    }

    /// Reset unread to zero. Returns false when nothing changed.
    pub async fn mark_read(&self, conversation_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.get_mut(conversation_id) {
            Some(conv) if conv.unread_count > 0 => conv.unread_count = 0,
            _ => return false,
        }
        self.publish(&inner);
        true
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        let inner = self.inner.read().await;
        inner
            .index
            .get(conversation_id)
            .and_then(|idx| inner.conversations.get(*idx))
            .cloned()
    }

    /// All conversations in insertion order
    pub async fn snapshot(&self) -> Vec<Conversation> {
        self.inner.read().await.conversations.clone()
    }

    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        let inner = self.inner.read().await;
        inner.conversations.iter().map(|c| c.summary()).collect()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageOrigin;

    fn message(conv: &str, id: &str, origin: MessageOrigin, status: MessageStatus) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conv.to_string(),
            text: format!("text of {}", id),
            sender_id: "someone".to_string(),
            timestamp: 1,
            origin,
            status,
        }
    }

    #[tokio::test]
    async fn test_create_conversation_is_idempotent() {
        let store = ConversationStore::new();
        store.create_conversation("a").await;
        store.upsert_local(message("a", "m1", MessageOrigin::Mine, MessageStatus::Sending)).await;
        store.create_conversation("a").await;
        store.create_conversation("b").await;

        let snap = store.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].id, "a");
        assert_eq!(snap[0].messages.len(), 1);
        assert_eq!(snap[1].title, "ChatId: b");
    }

    #[tokio::test]
    async fn test_upsert_local_never_counts_unread() {
        let store = ConversationStore::new();
        store.upsert_local(message("a", "m1", MessageOrigin::Mine, MessageStatus::Sending)).await;
        store.upsert_local(message("a", "m2", MessageOrigin::Mine, MessageStatus::Queued)).await;

        let conv = store.get("a").await.unwrap();
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.last_message.unwrap().id, "m2");
    }

    #[tokio::test]
    async fn test_merge_inbound_unread_rules() {
        let store = ConversationStore::new();

        assert!(store.merge_inbound(message("a", "x1", MessageOrigin::Other, MessageStatus::Sent), false).await);
        assert!(!store.merge_inbound(message("a", "x1", MessageOrigin::Other, MessageStatus::Sent), false).await);
        assert!(store.merge_inbound(message("a", "mine", MessageOrigin::Mine, MessageStatus::Sent), true).await);

        let conv = store.get("a").await.unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.unread_count, 1);

        assert!(store.mark_read("a").await);
        assert!(!store.mark_read("a").await);
        assert!(!store.mark_read("missing").await);
        assert_eq!(store.get("a").await.unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_echo_replaces_optimistic_copy() {
        let store = ConversationStore::new();
        store.upsert_local(message("a", "m1", MessageOrigin::Mine, MessageStatus::Sending)).await;
        store.upsert_local(message("a", "m2", MessageOrigin::Mine, MessageStatus::Sending)).await;
        store.merge_inbound(message("a", "m1", MessageOrigin::Mine, MessageStatus::Sent), true).await;

        let conv = store.get("a").await.unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].id, "m1");
        assert_eq!(conv.messages[0].status, MessageStatus::Sent);
        assert_eq!(conv.unread_count, 0);
        // last_message follows merge order
        assert_eq!(conv.last_message.unwrap().id, "m1");
    }

    #[tokio::test]
    async fn test_update_status_recomputes_last_message() {
        let store = ConversationStore::new();
        store.upsert_local(message("a", "m1", MessageOrigin::Mine, MessageStatus::Sending)).await;
        store.upsert_local(message("a", "m2", MessageOrigin::Mine, MessageStatus::Sending)).await;
        store.merge_inbound(message("a", "m1", MessageOrigin::Mine, MessageStatus::Sent), true).await;

        assert!(store.update_status("a", "m2", MessageStatus::Queued).await);
        let conv = store.get("a").await.unwrap();
        assert_eq!(conv.messages[1].status, MessageStatus::Queued);
        let last = conv.last_message.unwrap();
        assert_eq!(last.id, "m2");
        assert_eq!(last.status, MessageStatus::Queued);

        assert!(!store.update_status("a", "nope", MessageStatus::Failed).await);
        assert!(!store.update_status("nope", "m1", MessageStatus::Failed).await);
    }

    #[tokio::test]
    async fn test_subscribers_see_every_change() {
        let store = ConversationStore::new();
        let mut rx = store.subscribe();

        store.create_conversation("a").await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.merge_inbound(message("a", "x", MessageOrigin::Bot, MessageStatus::Sent), false).await;
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap[0].unread_count, 1);
        assert_eq!(snap[0].summary().last_message_preview, "text of x");
    }

    #[tokio::test]
    async fn test_concurrent_merges_are_serialized() {
        let store = ConversationStore::new();
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("m{}", i);
                store
                    .merge_inbound(message("a", &id, MessageOrigin::Other, MessageStatus::Sent), false)
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let conv = store.get("a").await.unwrap();
        assert_eq!(conv.messages.len(), 50);
        assert_eq!(conv.unread_count, 50);
    }
}
