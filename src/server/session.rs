//! Connection session
//!
//! Owns one client connection from the opening handshake to close. The
//! session is generic over the byte stream so it can run on a `TcpStream`
//! or an in-memory duplex pipe.
//!
//! All waiting is done with `.await` on the stream, the outbound queue or the
//! shutdown signal. Partial handshakes and partial frames stay in the read
//! buffer until more bytes arrive.

use std::future::pending;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::frame::{
    decode, encode, encode_close, encode_pong, encode_text, Decoded, Frame, FrameError, Opcode,
    CLOSE_GOING_AWAY,
};
use super::handler::MessageHandler;
use super::handshake::{self, HandshakeError};
use super::registry::OutboundReceiver;

/// Bytes requested from the stream per read
const READ_CHUNK: usize = 4096;

/// Default cap on a single frame payload (16 MiB)
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Errors that end a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Malformed handshake: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Protocol violation: {0}")]
    Frame(#[from] FrameError),

    #[error("Transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("No data received for {0:?}")]
    IdleTimeout(Duration),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the HTTP upgrade request
    AwaitingHandshake,
    /// Handshake done, exchanging frames
    Open,
    /// Terminal
    Closed,
}

/// Per-session limits
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Largest accepted frame payload
    pub max_payload_size: u64,
    /// Close the session when no bytes arrive from the peer for this long
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            idle_timeout: None,
        }
    }
}

/// What woke the session up
enum Event {
    /// Some bytes were appended to the read buffer; 0 means EOF
    Read(usize),
    /// A server-initiated message, or `None` once the queue is gone
    Outbound(Option<String>),
    /// The server is shutting down
    Shutdown,
}

/// What to do after handling a frame
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// A single WebSocket connection
pub struct ConnectionSession<S> {
    id: Uuid,
    stream: S,
    state: SessionState,
    buffer: Vec<u8>,
    config: SessionConfig,
    handler: Arc<dyn MessageHandler>,
    outbound: Option<OutboundReceiver>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
    last_inbound: Instant,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a session over a freshly accepted stream
    pub fn new(stream: S, handler: Arc<dyn MessageHandler>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            stream,
            state: SessionState::AwaitingHandshake,
            buffer: Vec::with_capacity(READ_CHUNK),
            config,
            handler,
            outbound: None,
            shutdown_rx: None,
            last_inbound: Instant::now(),
        }
    }

    /// Use a specific session ID
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Attach the queue fed by [`SessionRegistry::send_text`](super::SessionRegistry::send_text)
    pub fn with_outbound(mut self, outbound: OutboundReceiver) -> Self {
        self.outbound = Some(outbound);
        self
    }

    /// Close the session when the server shuts down
    pub fn with_shutdown(mut self, shutdown_rx: broadcast::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until it closes.
    ///
    /// Always leaves the session in [`SessionState::Closed`] with the stream
    /// shut down, whether it ended cleanly or with an error.
    pub async fn run(&mut self) -> SessionResult<()> {
        self.last_inbound = Instant::now();
        let result = self.drive().await;

        if self.state == SessionState::Open {
            self.handler.on_close(self.id);
        }
        self.state = SessionState::Closed;
        self.buffer.clear();
        if let Err(e) = self.stream.shutdown().await {
            debug!("Session {} shutdown error: {}", self.id, e);
        }

        result
    }

    async fn drive(&mut self) -> SessionResult<()> {
        if !self.handshake().await? {
            return Ok(());
        }
        self.state = SessionState::Open;
        self.handler.on_open(self.id);
        self.serve().await
    }

    /// Read and answer the upgrade request. Returns false if the server shut
    /// down before it arrived.
    async fn handshake(&mut self) -> SessionResult<bool> {
        let request_len = loop {
            if self.buffer.len() >= 3 && !handshake::is_upgrade_request(&self.buffer) {
                return Err(SessionError::ProtocolViolation(
                    "expected HTTP GET upgrade request".to_string(),
                ));
            }
            if let Some(end) = handshake::find_request_end(&self.buffer) {
                break end;
            }
            if self.buffer.len() > handshake::MAX_HANDSHAKE_LEN {
                return Err(HandshakeError::TooLarge.into());
            }

            match self.next_event(false).await? {
                Event::Read(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed during handshake",
                    )
                    .into())
                }
                Event::Read(_) | Event::Outbound(_) => {}
                Event::Shutdown => return Ok(false),
            }
        };

        let response = handshake::process_handshake_bytes(&self.buffer[..request_len])?;
        self.write(&response).await?;
        self.buffer.drain(..request_len);

        info!("Session {} upgraded", self.id);
        Ok(true)
    }

    async fn serve(&mut self) -> SessionResult<()> {
        loop {
            while let Decoded::Frame { frame, consumed } =
                decode(&self.buffer, self.config.max_payload_size)?
            {
                self.buffer.drain(..consumed);
                if self.handle_frame(frame).await? == Flow::Close {
                    return Ok(());
                }
            }

            match self.next_event(true).await? {
                Event::Read(0) => {
                    info!("Session {} closed by peer", self.id);
                    return Ok(());
                }
                Event::Read(n) => debug!("Session {} read {} bytes", self.id, n),
                Event::Outbound(Some(text)) => self.write(&encode_text(&text)).await?,
                Event::Outbound(None) => self.outbound = None,
                Event::Shutdown => {
                    info!("Shutdown signal received, closing session {}", self.id);
                    if let Err(e) = self.write(&encode_close(Some(CLOSE_GOING_AWAY))).await {
                        debug!("Session {} close frame not sent: {}", self.id, e);
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> SessionResult<Flow> {
        debug!(
            "Session {} frame {:?} fin={} len={}",
            self.id,
            frame.opcode,
            frame.fin,
            frame.payload_len()
        );

        if !frame.fin {
            return Err(fragmented());
        }

        match frame.opcode {
            Opcode::Continuation => return Err(fragmented()),
            Opcode::Text => {
                let text = String::from_utf8(frame.payload).map_err(|_| {
                    SessionError::ProtocolViolation("text frame is not valid UTF-8".to_string())
                })?;
                if let Some(reply) = self.handler.on_text_message(self.id, &text) {
                    self.write(&encode_text(&reply)).await?;
                }
            }
            Opcode::Binary => {
                if let Some(reply) = self.handler.on_binary_message(self.id, &frame.payload) {
                    self.write(&encode(Opcode::Binary, &reply, true)).await?;
                }
            }
            Opcode::Ping => self.write(&encode_pong(&frame.payload)).await?,
            Opcode::Pong => {}
            Opcode::Close => {
                info!(
                    "Session {} requested close (code {:?})",
                    self.id,
                    frame.close_code()
                );
                if let Err(e) = self.write(&encode_close(frame.close_code())).await {
                    warn!("Session {} close reply failed: {}", self.id, e);
                }
                return Ok(Flow::Close);
            }
        }

        Ok(Flow::Continue)
    }

    /// Wait for the next thing to act on.
    ///
    /// The idle deadline counts from the last inbound bytes, so outbound
    /// traffic does not keep a silent peer alive.
    async fn next_event(&mut self, accept_outbound: bool) -> SessionResult<Event> {
        let read = read_some(&mut self.stream, &mut self.buffer);
        let outbound = recv_outbound(&mut self.outbound, accept_outbound);
        let shutdown = wait_shutdown(&mut self.shutdown_rx);
        let idle = idle_expired(self.last_inbound, self.config.idle_timeout);

        let event = tokio::select! {
            n = read => Event::Read(n?),
            msg = outbound => Event::Outbound(msg),
            _ = shutdown => Event::Shutdown,
            limit = idle => return Err(SessionError::IdleTimeout(limit)),
        };

        if matches!(event, Event::Read(n) if n > 0) {
            self.last_inbound = Instant::now();
        }
        Ok(event)
    }

    async fn write(&mut self, bytes: &[u8]) -> SessionResult<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

fn fragmented() -> SessionError {
    SessionError::ProtocolViolation("fragmented messages are not supported".to_string())
}

async fn read_some<S: AsyncRead + Unpin>(
    stream: &mut S,
    buffer: &mut Vec<u8>,
) -> io::Result<usize> {
    let mut chunk = [0u8; READ_CHUNK];
    let n = stream.read(&mut chunk).await?;
    buffer.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Resolves with the limit once `limit` has passed since `last_inbound`
async fn idle_expired(last_inbound: Instant, limit: Option<Duration>) -> Duration {
    match limit {
        Some(limit) => {
            sleep_until(last_inbound + limit).await;
            limit
        }
        None => pending().await,
    }
}

async fn recv_outbound(outbound: &mut Option<OutboundReceiver>, enabled: bool) -> Option<String> {
    match outbound {
        Some(rx) if enabled => rx.recv().await,
        _ => pending().await,
    }
}

async fn wait_shutdown(shutdown_rx: &mut Option<broadcast::Receiver<()>>) {
    match shutdown_rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => pending().await,
    }
}
