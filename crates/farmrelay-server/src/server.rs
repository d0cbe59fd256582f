//! TCP acceptor.
//!
//! Binds the listening socket, hands accepted connections to the worker
//! pool and runs the shutdown sequence.

use crate::broadcast::Broadcaster;
use crate::config::{ConfigError, ServerConfig};
use crate::pool::WorkerPool;
use crate::RelayContext;
use farmrelay_registry::{Registry, Role};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Notice sent to every node when the relay stops.
pub const SHUTDOWN_MESSAGE: &str = "Server is closing...";

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The farmrelay TCP server.
pub struct RelayServer {
    config: ServerConfig,
    listener: TcpListener,
    registry: Registry,
    shutdown: Arc<watch::Sender<bool>>,
    local_addr: SocketAddr,
}

/// Cloneable control handle for a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    registry: Registry,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Asks the acceptor to stop. Calling it twice is harmless.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl RelayServer {
    /// Validates the config and binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        Self::bind_with_registry(config, Registry::new()).await
    }

    /// Binds with a registry owned by the caller.
    pub async fn bind_with_registry(
        config: ServerConfig,
        registry: Registry,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            listener,
            registry,
            shutdown: Arc::new(shutdown),
            local_addr,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            registry: self.registry.clone(),
            local_addr: self.local_addr,
        }
    }

    /// Accepts connections until [`ServerHandle::shutdown`] is called, then
    /// notifies every node and waits for sessions to finish.
    pub async fn run(self) -> Result<(), ServerError> {
        let RelayServer {
            config,
            listener,
            registry,
            shutdown,
            local_addr,
        } = self;

        let ctx = RelayContext::new(registry.clone(), &config, shutdown.subscribe());
        let pool = WorkerPool::start(
            config.worker_pool_size,
            config.queue_capacity,
            config.backpressure,
            ctx,
        );

        info!("🌾 farmrelay listening on {}", local_addr);
        info!(
            "👷 {} workers, queue {} ({:?} when full)",
            pool.size(),
            config.queue_capacity,
            config.backpressure
        );

        let mut stop = shutdown.subscribe();
        loop {
            if *stop.borrow_and_update() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("New connection from {}", peer);
                        tokio::select! {
                            submitted = pool.submit(stream, peer) => {
                                if let Err(e) = submitted {
                                    warn!("🚫 Refusing connection from {}: {}", peer, e);
                                }
                            }
                            _ = stop.changed() => break,
                        }
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = stop.changed() => break,
            }
        }

        drop(listener);
        info!("🛑 Shutting down, no longer accepting connections");

        let broadcaster = Broadcaster::new(registry.clone());
        if config.shutdown_grace_ms > 0 {
            let grace = Duration::from_millis(config.shutdown_grace_ms);
            broadcaster.warn_all(&format!(
                "Server is closing in {} seconds",
                grace.as_secs_f64()
            ));
            tokio::time::sleep(grace).await;
        }
        broadcaster.shutdown_all(SHUTDOWN_MESSAGE);

        let drain_timeout = Duration::from_millis(config.drain_timeout_ms);
        if !pool.drain(drain_timeout).await {
            warn!(
                "{} nodes still registered at exit",
                registry.len(Role::ControlPanel) + registry.len(Role::SensorActuator)
            );
        }

        info!("✅ Relay stopped");
        Ok(())
    }
}
