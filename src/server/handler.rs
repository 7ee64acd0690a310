//! Application message handlers
//!
//! The session decodes frames and hands complete text messages to a
//! [`MessageHandler`]. Whatever the handler returns is sent back in a frame
//! of the same type.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::protocol::{ChatMessage, DEFAULT_SERVER_NAME};

/// Callbacks invoked by a session for application traffic
pub trait MessageHandler: Send + Sync {
    /// Called for every decoded text message. `Some` is sent back to the peer.
    fn on_text_message(&self, session_id: Uuid, text: &str) -> Option<String>;

    /// Called for every binary message. `Some` is sent back as a binary frame.
    fn on_binary_message(&self, session_id: Uuid, data: &[u8]) -> Option<Vec<u8>> {
        warn!(
            "Session {} sent binary message ({} bytes), ignoring",
            session_id,
            data.len()
        );
        None
    }

    /// Called once after the handshake completes
    fn on_open(&self, session_id: Uuid) {
        debug!("Session {} opened", session_id);
    }

    /// Called once when the session ends
    fn on_close(&self, session_id: Uuid) {
        debug!("Session {} closed", session_id);
    }
}

/// Which built-in handler to run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Reply with the received text
    #[default]
    Echo,
    /// Reply with a JSON chat envelope
    Chat,
}

/// Sends every text message straight back
#[derive(Debug, Default, Clone)]
pub struct EchoHandler;

impl MessageHandler for EchoHandler {
    fn on_text_message(&self, session_id: Uuid, text: &str) -> Option<String> {
        debug!("Echoing {} bytes to {}", text.len(), session_id);
        Some(text.to_string())
    }
}

/// Wraps every text message in a [`ChatMessage`] envelope
#[derive(Debug, Clone)]
pub struct ChatHandler {
    name: String,
}

impl ChatHandler {
    /// Create a chat handler that signs replies with `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for ChatHandler {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_NAME)
    }
}

impl MessageHandler for ChatHandler {
    fn on_text_message(&self, session_id: Uuid, text: &str) -> Option<String> {
        match ChatMessage::new(&self.name, text).to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to build chat reply for {}: {}", session_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_handler() {
        let handler = EchoHandler;
        assert_eq!(
            handler.on_text_message(Uuid::new_v4(), "hello"),
            Some("hello".to_string())
        );
    }

    #[test]
    fn test_binary_ignored_by_default() {
        let handler = EchoHandler;
        assert_eq!(handler.on_binary_message(Uuid::new_v4(), &[1, 2, 3]), None);
    }

    #[test]
    fn test_chat_handler_wraps_text() {
        let handler = ChatHandler::new("lobby");
        let reply = handler.on_text_message(Uuid::new_v4(), "hi there").unwrap();
        let msg = ChatMessage::from_json(&reply).unwrap();
        assert_eq!(msg.name, "lobby");
        assert_eq!(msg.text, "hi there");
    }

    #[test]
    fn test_chat_handler_default_name() {
        let reply = ChatHandler::default()
            .on_text_message(Uuid::new_v4(), "x")
            .unwrap();
        assert!(reply.contains(DEFAULT_SERVER_NAME));
    }
}
