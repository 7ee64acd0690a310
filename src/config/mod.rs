//! Configuration module
//!
//! Loads server configuration from an optional TOML file; CLI flags are
//! layered on top by the binary.

mod server;

pub use server::*;
