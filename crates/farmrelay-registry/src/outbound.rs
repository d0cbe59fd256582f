use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundError {
    #[error("outbound queue is full")]
    Full,
    #[error("session is closed")]
    Closed,
}

/// Write side of one session.
///
/// Lines pushed here are picked up by the session's writer task and written
/// to the socket in order. Sending never waits for the socket.
#[derive(Debug, Clone)]
pub struct Outbound {
    session_id: Uuid,
    tx: mpsc::Sender<String>,
}

impl Outbound {
    /// Creates a queue for the given session and returns the receiving end
    /// for its writer task.
    pub fn channel(session_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { session_id, tx }, rx)
    }

    /// The session this queue belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Queues one line (without the trailing newline).
    pub fn send(&self, line: impl Into<String>) -> Result<(), OutboundError> {
        self.tx.try_send(line.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OutboundError::Full,
            mpsc::error::TrySendError::Closed(_) => OutboundError::Closed,
        })
    }
}
