/// Error types for the chat sync layer
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport connect/join failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single payload could not be published
    #[error("Send error: {0}")]
    Send(String),

    /// Malformed inbound payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rejected outbound input (blank text)
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
