//! Per-connection session.
//!
//! A session owns one accepted connection for its whole life: handshake,
//! read loop, and teardown. Writes go through a queue drained by a separate
//! writer task so a slow peer never blocks whoever is sending to it.

use crate::broadcast::deliver;
use crate::handlers::dispatch;
use crate::handshake;
use crate::protocol::{read_line, ReadOutcome, ServerMessage};
use crate::RelayContext;
use farmrelay_registry::{NodeId, Outbound, Registry, Role};
use std::net::SocketAddr;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Live state of one connection.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub role: Role,
    /// Set once the handshake registered the node.
    pub node_id: Option<NodeId>,
    pub outbound: Outbound,
    /// The relay is shutting down; the session keeps serving until its peer leaves.
    pub shutting_down: bool,
}

impl Session {
    pub fn new(peer: SocketAddr, role: Role, outbound: Outbound) -> Self {
        Self {
            id: outbound.session_id(),
            peer,
            role,
            node_id: None,
            outbound,
            shutting_down: false,
        }
    }

    /// Queues a message back to this session's peer.
    pub fn reply(&self, message: &ServerMessage) -> bool {
        match deliver(&self.outbound, message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not reply to {}: {}", self, e);
                false
            }
        }
    }

    /// Deregisters the node and releases the write queue.
    fn close(self, registry: &Registry) {
        if let Some(node_id) = self.node_id {
            if !registry.remove_session(self.role, node_id, self.id) {
                debug!(
                    "{} node {} was already replaced, leaving registry as is",
                    self.role, node_id
                );
            }
        }

        if self.shutting_down {
            info!("👋 Client disconnected during shutdown: {}", self);
        } else {
            info!("👋 Client disconnected: {}", self);
        }
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.node_id {
            Some(node_id) => write!(f, "{} node {} ({})", self.role, node_id, self.peer),
            None => write!(f, "{} ({})", self.role, self.peer),
        }
    }
}

/// Serves one connection until the peer goes away.
pub async fn run_session<S>(stream: S, peer: SocketAddr, ctx: RelayContext)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbound, rx) = Outbound::channel(Uuid::new_v4(), ctx.outbound_capacity);
    let writer = tokio::spawn(run_writer(write_half, rx, peer));
    let mut reader = BufReader::new(read_half);

    let registered =
        handshake::perform(&mut reader, peer, outbound, &ctx.registry, ctx.max_line_bytes).await;
    match registered {
        Ok(session) => read_loop(&mut reader, session, &ctx).await,
        Err(e) => warn!("❌ Handshake with {} failed: {}", peer, e),
    }

    if let Err(e) = writer.await {
        warn!("Writer for {} stopped abnormally: {}", peer, e);
    }
}

async fn read_loop<R>(reader: &mut R, mut session: Session, ctx: &RelayContext)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_line(reader, ctx.max_line_bytes).await {
            ReadOutcome::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = dispatch(&line, &session, ctx);
                debug!("Frame from {} -> {:?}", session, outcome);

                if !session.shutting_down && ctx.is_shutting_down() {
                    session.shutting_down = true;
                }
            }
            ReadOutcome::Malformed(e) => {
                warn!("⚠️  Dropping frame from {}: {}", session, e);
            }
            ReadOutcome::Eof => {
                debug!("{} closed the connection", session);
                break;
            }
            ReadOutcome::Failed(e) => {
                warn!("⚠️  Read error from {}: {}", session, e);
                break;
            }
        }
    }

    session.close(&ctx.registry);
}

/// Drains a session's queue into the socket, one line per message.
async fn run_writer<W>(mut writer: W, mut rx: mpsc::Receiver<String>, peer: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            warn!("Write to {} failed: {}", peer, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
