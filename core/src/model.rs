/// Domain types shared by the store, delivery engine and reconciliation pipeline
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Optimistically inserted, network attempt in flight
    Sending,
    /// Waiting in the pending queue
    Queued,
    /// Confirmed by the server echo
    Sent,
    /// Last retry attempt failed; still queued
    Failed,
}

impl MessageStatus {
    /// Short badge shown next to a message
    pub fn badge(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending…",
            MessageStatus::Queued => "queued",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.badge())
    }
}

/// Who authored a message, from the local client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Mine,
    Bot,
    Other,
}

/// A status-tracked message inside a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub text: String,
    pub sender_id: String,
    /// Epoch millis as stamped by the sender
    pub timestamp: i64,
    pub origin: MessageOrigin,
    pub status: MessageStatus,
}

impl Message {
    pub fn is_mine(&self) -> bool {
        self.origin == MessageOrigin::Mine
    }
}

/// One conversation thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Newest message by merge order, not by timestamp
    pub last_message: Option<Message>,
    /// Insertion order, unique by message id
    pub messages: Vec<Message>,
    pub unread_count: u32,
}

impl Conversation {
    /// Create an empty conversation with a title derived from its id
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title_for(id),
            last_message: None,
            messages: Vec::new(),
            unread_count: 0,
        }
    }

    /// Position of a message by id
    pub fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Insert or replace in place. Returns true when the id was new.
    pub(crate) fn upsert(&mut self, message: Message) -> bool {
        match self.position(&message.id) {
            Some(idx) => {
                self.messages[idx] = message;
                false
            }
            None => {
                self.messages.push(message);
                true
            }
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            last_message_preview: self
                .last_message
                .as_ref()
                .map(|m| m.text.clone())
                .unwrap_or_default(),
            unread_count: self.unread_count,
        }
    }
}

/// Deterministic title for a conversation id
pub fn title_for(id: &str) -> String {
    format!("ChatId: {}", id)
}

/// List-view projection of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub last_message_preview: String,
    pub unread_count: u32,
}

/// Transport channel state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}
