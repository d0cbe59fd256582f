//! farmrelay Server - TCP relay between control panels and field nodes
//!
//! This crate implements the relay side of the farmrelay line protocol,
//! letting control panels and sensor/actuator nodes find each other and
//! exchange commands and telemetry.
//!
//! The server supports:
//! - A fixed pool of session workers with bounded backpressure
//! - A two-line handshake that classifies each connection by role
//! - Typed JSON envelopes, one per line
//! - Point-to-point forwarding and registry-wide broadcasts
//! - Orderly shutdown with a SHUT_DOWN notice to every node

use farmrelay_registry::Registry;
use tokio::sync::watch;

mod broadcast;
mod config;
mod handlers;
mod handshake;
mod pool;
mod protocol;
mod server;
mod session;

pub use broadcast::{
    deliver, BroadcastReport, Broadcaster, DeliveryError, ForwardError, Forwarder,
};
pub use config::{Backpressure, ConfigError, ServerConfig, DEFAULT_MAX_LINE_BYTES, DEFAULT_PORT};
pub use handlers::{dispatch, Outcome};
pub use handshake::HandshakeError;
pub use pool::{PoolError, WorkerPool};
pub use protocol::{DecodeError, Envelope, ServerMessage};
pub use server::{RelayServer, ServerError, ServerHandle, SHUTDOWN_MESSAGE};
pub use session::{run_session, Session};

/// Everything a session needs to reach the rest of the relay.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub registry: Registry,
    pub forwarder: Forwarder,
    /// Per-session outbound queue size.
    pub outbound_capacity: usize,
    /// Longest inbound line a session accepts.
    pub max_line_bytes: usize,
    shutdown: watch::Receiver<bool>,
}

impl RelayContext {
    pub fn new(
        registry: Registry,
        config: &ServerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            forwarder: Forwarder::new(registry.clone()),
            registry,
            outbound_capacity: config.outbound_capacity,
            max_line_bytes: config.max_line_bytes,
            shutdown,
        }
    }

    /// Whether the acceptor has started shutting down.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// A context that never shuts down.
    #[cfg(test)]
    pub(crate) fn detached(registry: Registry) -> Self {
        let (_tx, rx) = watch::channel(false);
        let config = ServerConfig {
            outbound_capacity: 16,
            ..ServerConfig::default()
        };
        Self::new(registry, &config, rx)
    }
}
