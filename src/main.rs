//! WebSockets Sandbox Server
//!
//! Minimal RFC 6455 server: performs the HTTP upgrade handshake itself and
//! speaks the base framing protocol over plain TCP. Text messages are
//! echoed back, optionally wrapped in a JSON chat envelope.

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{ServerConfig, CONFIG_FILE};
use server::{HandlerKind, WebSocketServer};

/// WebSockets Sandbox Server
///
/// Hand-rolled RFC 6455 WebSocket server
#[derive(Parser, Debug)]
#[command(name = "ws-sandbox")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Close sessions idle for this many seconds
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Application handler for text messages
    #[arg(long, value_enum)]
    handler: Option<HandlerKind>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("WebSockets Sandbox v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load(&args.config)?
        .with_bind(args.bind)
        .with_port(args.port)
        .with_idle_timeout(args.idle_timeout)
        .with_max_sessions(args.max_sessions)
        .with_handler(args.handler);
    config.validate()?;

    info!(
        "Handler: {:?}, max sessions: {}, idle timeout: {:?}",
        config.handler, config.max_sessions, config.idle_timeout_secs
    );

    let server = Arc::new(WebSocketServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
