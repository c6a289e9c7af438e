/// Line-delimited frames spoken between `TcpTransport` and the relay
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Client asks to join a channel
    Join { channel: String },

    /// Relay confirms membership
    Joined { channel: String },

    /// Client leaves a channel
    Leave { channel: String },

    /// Client publishes an event body to a channel
    Publish {
        channel: String,
        event: String,
        data: String,
    },

    /// Relay delivers an event body to channel members (publisher included)
    Event {
        channel: String,
        event: String,
        data: String,
    },

    /// Relay-side error for the previous frame
    Error { message: String },
}

impl RelayFrame {
    /// One JSON object followed by `\n`
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| SyncError::Parse(format!("Invalid frame: {}", e)))
    }
}
