//! Server configuration
//!
//! Loads listener and session settings from a TOML file such as:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 8082
//! idle_timeout_secs = 300
//! handler = "chat"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::server::{HandlerKind, SessionConfig, DEFAULT_MAX_PAYLOAD, DEFAULT_SERVER_NAME};

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "ws-sandbox.toml";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8082;

/// Default concurrent session cap
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Largest accepted session cap; shutdown waits on this many permits at once
pub const MAX_SESSIONS_LIMIT: usize = u32::MAX as usize;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the WebSocket server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Close sessions idle for this many seconds
    pub idle_timeout_secs: Option<u64>,
    /// Largest accepted frame payload in bytes
    pub max_payload_size: u64,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Application handler to run for text messages
    pub handler: HandlerKind,
    /// Sender name used by the chat handler
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            idle_timeout_secs: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            max_sessions: DEFAULT_MAX_SESSIONS,
            handler: HandlerKind::default(),
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Create a configuration with default limits
    pub fn new(bind: impl Into<String>, port: u16) -> Self {
        Self {
            bind: bind.into(),
            port,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if self.max_sessions > MAX_SESSIONS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_sessions must be at most {}",
                MAX_SESSIONS_LIMIT
            )));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "idle_timeout_secs must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Override the bind address
    pub fn with_bind(mut self, bind: Option<String>) -> Self {
        if let Some(bind) = bind {
            self.bind = bind;
        }
        self
    }

    /// Override the port
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    /// Override the idle timeout
    pub fn with_idle_timeout(mut self, secs: Option<u64>) -> Self {
        if secs.is_some() {
            self.idle_timeout_secs = secs;
        }
        self
    }

    /// Override the session cap
    pub fn with_max_sessions(mut self, max_sessions: Option<usize>) -> Self {
        if let Some(max_sessions) = max_sessions {
            self.max_sessions = max_sessions;
        }
        self
    }

    /// Override the handler
    pub fn with_handler(mut self, handler: Option<HandlerKind>) -> Self {
        if let Some(handler) = handler {
            self.handler = handler;
        }
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Per-session limits derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_payload_size: self.max_payload_size,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}
