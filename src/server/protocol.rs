//! Chat message envelope
//!
//! JSON shape used by the chat handler for messages pushed to clients.
//! Nothing in the frame layer depends on it.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sender name used when none is configured
pub const DEFAULT_SERVER_NAME: &str = "WebSockets Server";

/// Errors produced while building envelopes
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Kind of chat envelope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
}

/// A chat message as sent to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Envelope kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Display name of the sender
    pub name: String,
    /// Message body
    pub text: String,
    /// Unix timestamp in seconds
    pub date: i64,
}

impl ChatMessage {
    /// Create a message stamped with the current time
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::at(name, text, unix_now())
    }

    /// Create a message with an explicit timestamp
    pub fn at(name: impl Into<String>, text: impl Into<String>, date: i64) -> Self {
        Self {
            kind: MessageKind::Message,
            name: name.into(),
            text: text.into(),
            date,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON (primarily for testing)
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
