//! Session registry
//!
//! Maps session IDs to their outbound queues so server-side code can push
//! messages to a specific client. Sessions themselves do not share state;
//! the registry only holds channel senders.
//!
//! Sends never wait: a session whose queue is full (still in the handshake,
//! or a peer that stopped reading) rejects the message instead of stalling
//! the caller.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capacity of each session's outbound queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Errors that can occur during registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {0} is closing")]
    SessionClosed(Uuid),

    #[error("Outbound queue of session {0} is full")]
    QueueFull(Uuid),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Receiving end handed to a session
pub type OutboundReceiver = mpsc::Receiver<String>;

/// Registry of open sessions
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the queue it should drain
    pub async fn register(&self, session_id: Uuid) -> OutboundReceiver {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        self.sessions.write().await.insert(session_id, tx);
        debug!("Registered session {}", session_id);
        rx
    }

    /// Remove a session
    pub async fn unregister(&self, session_id: Uuid) {
        if self.sessions.write().await.remove(&session_id).is_some() {
            debug!("Unregistered session {}", session_id);
        }
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// IDs of all registered sessions
    pub async fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Push a server-initiated text message to one session
    pub async fn send_text(&self, session_id: Uuid, text: impl Into<String>) -> RegistryResult<()> {
        let tx = self
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(RegistryError::SessionNotFound(session_id))?;

        tx.try_send(text.into()).map_err(|e| match e {
            TrySendError::Full(_) => RegistryError::QueueFull(session_id),
            TrySendError::Closed(_) => RegistryError::SessionClosed(session_id),
        })
    }

    /// Push a text message to every session. Returns how many accepted it.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for (session_id, tx) in sessions.iter() {
            match tx.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue of session {} is full, dropping broadcast", session_id);
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_text_reaches_session() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id).await;

        registry.send_text(id, "hello").await.unwrap();
        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_send_text_unknown_session() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        assert_eq!(
            registry.send_text(id, "x").await,
            Err(RegistryError::SessionNotFound(id))
        );
    }

    #[tokio::test]
    async fn test_send_text_after_receiver_dropped() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        drop(registry.register(id).await);
        assert_eq!(
            registry.send_text(id, "x").await,
            Err(RegistryError::SessionClosed(id))
        );
    }

    #[tokio::test]
    async fn test_send_text_to_full_queue() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id).await;

        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            registry.send_text(id, i.to_string()).await.unwrap();
        }
        assert_eq!(
            registry.send_text(id, "overflow").await,
            Err(RegistryError::QueueFull(id))
        );

        assert_eq!(rx.recv().await.as_deref(), Some("0"));
        registry.send_text(id, "fits again").await.unwrap();
    }

    #[tokio::test]
    async fn test_stalled_session_does_not_block_broadcast() {
        let registry = SessionRegistry::new();
        let stalled = Uuid::new_v4();
        let _stalled_rx = registry.register(stalled).await;
        let mut healthy = registry.register(Uuid::new_v4()).await;

        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            assert_eq!(registry.broadcast_text("fill").await, 2);
            assert_eq!(healthy.recv().await.as_deref(), Some("fill"));
        }

        assert_eq!(registry.broadcast_text("late").await, 1);
        assert_eq!(healthy.recv().await.as_deref(), Some("late"));
        assert_eq!(
            registry.send_text(stalled, "late").await,
            Err(RegistryError::QueueFull(stalled))
        );
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let _rx = registry.register(id).await;
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(registry.session_ids().await, vec![id]);

        registry.unregister(id).await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_text() {
        let registry = SessionRegistry::new();
        let mut a = registry.register(Uuid::new_v4()).await;
        let mut b = registry.register(Uuid::new_v4()).await;
        drop(registry.register(Uuid::new_v4()).await);

        assert_eq!(registry.broadcast_text("all").await, 2);
        assert_eq!(a.recv().await.as_deref(), Some("all"));
        assert_eq!(b.recv().await.as_deref(), Some("all"));
    }
}
