/// Wire payload exchanged over the channel
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    #[serde(rename = "user_message")]
    UserMessage,
    #[serde(rename = "bot_message")]
    BotMessage,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::UserMessage => "user_message",
            PayloadKind::BotMessage => "bot_message",
        }
    }
}

/// Flat JSON object with exactly five keys:
/// `type`, `conversationId`, `text`, `senderId`, `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender_id: String,
    /// Epoch millis; decodes as "now" when absent
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

impl ChatPayload {
    pub fn user_message(conversation_id: &str, text: &str, sender_id: &str, timestamp: i64) -> Self {
        Self {
            kind: PayloadKind::UserMessage,
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            sender_id: sender_id.to_string(),
            timestamp,
        }
    }

    pub fn bot_message(conversation_id: &str, text: &str, bot_id: &str, timestamp: i64) -> Self {
        Self {
            kind: PayloadKind::BotMessage,
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            sender_id: bot_id.to_string(),
            timestamp,
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(SyncError::Serialization)
    }

    /// Parse from a JSON string. Blank input and malformed JSON are parse errors.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(SyncError::Parse("empty payload".to_string()));
        }
        serde_json::from_str(raw).map_err(|e| SyncError::Parse(format!("{}: {}", e, raw)))
    }
}

impl fmt::Display for ChatPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} -> {})",
            self.kind.as_str(),
            self.sender_id,
            self.conversation_id
        )
    }
}

/// Current wall-clock time in epoch millis
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
