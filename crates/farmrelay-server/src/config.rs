//! Server configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Port the relay listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 6019;

/// Default cap on a single inbound line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// What the acceptor does when every worker is busy and the job queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Stop accepting until a slot frees up.
    #[default]
    Queue,
    /// Close the new connection straight away.
    Reject,
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub addr: SocketAddr,
    /// Number of sessions served concurrently.
    pub worker_pool_size: usize,
    /// Accepted connections waiting for a worker.
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
    /// Lines buffered per session before writes to it start failing.
    pub outbound_capacity: usize,
    /// Delay between the shutdown warning and the SHUT_DOWN notice.
    /// Zero skips the warning.
    pub shutdown_grace_ms: u64,
    /// How long shutdown waits for sessions to finish.
    pub drain_timeout_ms: u64,
    /// Longest accepted inbound line, terminator excluded. Longer lines are
    /// dropped.
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            worker_pool_size: 10,
            queue_capacity: 32,
            backpressure: Backpressure::Queue,
            outbound_capacity: 64,
            shutdown_grace_ms: 0,
            drain_timeout_ms: 5000,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Reads a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Zero("worker_pool_size"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound_capacity"));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Zero("max_line_bytes"));
        }
        Ok(())
    }

    /// Same config on a different port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }
}
