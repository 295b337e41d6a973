//! Shared utilities for Camlink: signaling protocol, logging, error types.
//!
//! This crate provides common infrastructure used by both the publishing
//! client and the receiving server.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;
pub mod protocol;
pub mod tls;

pub use error::{Error, Result};
pub use protocol::*;

/// Default signaling/trust-page port.
pub const DEFAULT_PORT: u16 = 5001;

/// mDNS service type advertised by the server.
pub const MDNS_SERVICE_TYPE: &str = "_camlink._tcp.local.";

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
