//! WebSocket server module
//!
//! Implements the RFC 6455 opening handshake and base framing, and runs one
//! session per client connection on top of them.

#[allow(dead_code)]
pub mod frame;
mod handler;
#[allow(dead_code)]
pub mod handshake;
#[allow(dead_code)]
mod protocol;
#[allow(dead_code)]
mod registry;
#[allow(dead_code)]
mod session;
mod websocket;

pub use handler::*;
pub use protocol::*;
#[allow(unused_imports)]
pub use registry::*;
pub use session::*;
pub use websocket::*;
