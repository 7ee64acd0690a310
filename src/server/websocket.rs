//! WebSocket server implementation
//!
//! Listens on a configurable address and runs one [`ConnectionSession`] per
//! accepted connection, each on its own tokio task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::handler::{ChatHandler, EchoHandler, HandlerKind, MessageHandler};
use super::registry::SessionRegistry;
use super::session::{ConnectionSession, SessionConfig};
use crate::config::ServerConfig;

/// How long shutdown waits for sessions to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the handler selected by the configuration
pub fn build_handler(config: &ServerConfig) -> Arc<dyn MessageHandler> {
    match config.handler {
        HandlerKind::Echo => Arc::new(EchoHandler),
        HandlerKind::Chat => Arc::new(ChatHandler::new(config.server_name.clone())),
    }
}

/// WebSocket server accepting client connections
pub struct WebSocketServer {
    config: ServerConfig,
    handler: Arc<dyn MessageHandler>,
    registry: SessionRegistry,
    sessions: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a server using the handler named in the configuration
    pub fn new(config: ServerConfig) -> Self {
        let handler = build_handler(&config);
        Self::with_handler(config, handler)
    }

    /// Create a server with a custom application handler
    pub fn with_handler(config: ServerConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let sessions = Arc::new(Semaphore::new(config.max_sessions));
        Self {
            config,
            handler,
            registry: SessionRegistry::new(),
            sessions,
            shutdown_tx,
        }
    }

    /// Registry of open sessions, for pushing server-initiated messages
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("WebSocket server listening on ws://{}", addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.accept(stream, peer_addr),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        // Wait for active sessions to send their close frames
        let open = self.registry.session_count().await;
        if open > 0 {
            info!("Waiting for {} active sessions to close...", open);
            let all = u32::try_from(self.config.max_sessions).unwrap_or(u32::MAX);
            if tokio::time::timeout(SHUTDOWN_GRACE, self.sessions.acquire_many(all))
                .await
                .is_err()
            {
                warn!("Sessions still open after {:?}, exiting anyway", SHUTDOWN_GRACE);
            }
        }

        Ok(())
    }

    fn accept(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let permit = match Arc::clone(&self.sessions).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Session limit of {} reached, dropping connection from {}",
                    self.config.max_sessions, peer_addr
                );
                return;
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let handler = Arc::clone(&self.handler);
        let registry = self.registry.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let session_config = self.config.session_config();

        tokio::spawn(async move {
            handle_connection(
                stream,
                peer_addr,
                handler,
                registry,
                shutdown_rx,
                session_config,
                permit,
            )
            .await;
        });
    }
}

/// Run a single connection to completion
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<dyn MessageHandler>,
    registry: SessionRegistry,
    shutdown_rx: broadcast::Receiver<()>,
    config: SessionConfig,
    _permit: OwnedSemaphorePermit,
) {
    let session_id = Uuid::new_v4();
    info!("New connection from {} (session {})", peer_addr, session_id);

    let outbound = registry.register(session_id).await;
    let mut session = ConnectionSession::new(stream, handler, config)
        .with_id(session_id)
        .with_outbound(outbound)
        .with_shutdown(shutdown_rx);

    if let Err(e) = session.run().await {
        error!("Session {} from {} failed: {}", session_id, peer_addr, e);
    }

    registry.unregister(session_id).await;
    info!("Connection from {} closed", peer_addr);
}
