//! Fixed-size session worker pool.
//!
//! The acceptor hands each connection to the pool as a job. A fixed number
//! of workers pull jobs from one bounded queue and serve each session to
//! completion before taking the next.

use crate::config::Backpressure;
use crate::session::run_session;
use crate::RelayContext;
use futures_util::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Job = (TcpStream, SocketAddr);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("all workers busy and the queue is full")]
    Saturated,
    #[error("worker pool is shut down")]
    Closed,
}

/// Bounded pool of session workers.
#[derive(Debug)]
pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    backpressure: Backpressure,
}

impl WorkerPool {
    /// Spawns `size` workers sharing a queue of `queue_capacity` jobs.
    pub fn start(
        size: usize,
        queue_capacity: usize,
        backpressure: Backpressure,
        ctx: RelayContext,
    ) -> Self {
        let (jobs, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size.max(1))
            .map(|worker| tokio::spawn(run_worker(worker, rx.clone(), ctx.clone())))
            .collect();

        debug!(
            "Started {} workers (queue {}, {:?})",
            size, queue_capacity, backpressure
        );
        Self {
            jobs,
            workers,
            backpressure,
        }
    }

    /// Hands a connection to the workers.
    ///
    /// With [`Backpressure::Queue`] this waits for a free queue slot; with
    /// [`Backpressure::Reject`] a full queue fails immediately and the
    /// caller drops the connection.
    pub async fn submit(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), PoolError> {
        match self.backpressure {
            Backpressure::Queue => self
                .jobs
                .send((stream, peer))
                .await
                .map_err(|_| PoolError::Closed),
            Backpressure::Reject => self.jobs.try_send((stream, peer)).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PoolError::Saturated,
                mpsc::error::TrySendError::Closed(_) => PoolError::Closed,
            }),
        }
    }

    /// Connections waiting for a worker.
    pub fn queued(&self) -> usize {
        self.jobs.max_capacity() - self.jobs.capacity()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stops taking jobs and waits for running sessions to end.
    ///
    /// Returns false if some sessions were still running at the deadline.
    /// Those are left to the runtime; their reads are never interrupted.
    pub async fn drain(self, timeout: Duration) -> bool {
        drop(self.jobs);

        let workers = self.workers.len();
        match tokio::time::timeout(timeout, join_all(self.workers)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "⏱️  Sessions still open after {:?}, leaving {} workers behind",
                    timeout, workers
                );
                false
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    ctx: RelayContext,
) {
    loop {
        let job = jobs.lock().await.recv().await;
        let Some((stream, peer)) = job else {
            break;
        };

        if ctx.is_shutting_down() {
            debug!("Dropping queued connection from {} during shutdown", peer);
            continue;
        }

        info!("🔌 Worker {} serving {}", worker, peer);
        run_session(stream, peer, ctx.clone()).await;
    }
    debug!("Worker {} stopped", worker);
}
