//! Packet dispatcher: the receive loop and its bounded worker pool.
//!
//! One task owns the transport's receive side. Each datagram is copied out
//! of the shared receive buffer and queued as a job; a fixed number of
//! worker tasks pull jobs, decode them, and hand the frame to the
//! [`Router`].
//!
//! # Overload
//!
//! The job queue is bounded. When it is full the datagram is dropped and
//! counted, never queued without limit. UDP already gives no delivery
//! guarantee, so a client cannot tell an overload drop from network loss.
//!
//! # Shutdown
//!
//! The loop stops when a shutdown is requested or the transport fails to
//! receive. Either way the queue is closed to new jobs, queued jobs still
//! run, and [`Dispatcher::run`] returns once every worker has exited.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use datachat_proto::codec;
use datachat_proto::frame::MAX_DATAGRAM_SIZE;
use tokio::sync::{Mutex, mpsc, watch};

use crate::router::Router;
use crate::transport::{DatagramTransport, Endpoint, TransportError};

/// Default number of worker tasks.
pub const DEFAULT_WORKERS: usize = 10;

/// Default number of datagrams that may wait for a worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Sizing for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Worker tasks decoding and routing concurrently. At least 1.
    pub workers: usize,
    /// Jobs that may wait in the queue before new datagrams are dropped.
    pub queue_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Running counters for one dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    overloaded: AtomicU64,
    malformed: AtomicU64,
    routed: AtomicU64,
}

/// A point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    /// Datagrams read from the transport.
    pub received: u64,
    /// Datagrams dropped because the queue was full.
    pub overloaded: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
    /// Frames handed to the router.
    pub routed: u64,
}

impl DispatchStats {
    /// Reads all counters.
    #[must_use]
    pub fn counts(&self) -> DispatchCounts {
        DispatchCounts {
            received: self.received.load(Ordering::Relaxed),
            overloaded: self.overloaded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Requests an orderly stop of a running dispatcher.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stops the receive loop. Queued jobs still complete.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// A datagram waiting for a worker.
struct Job {
    datagram: Vec<u8>,
    from: Endpoint,
}

/// Owns the receive loop and the worker pool for one relay instance.
pub struct Dispatcher<T> {
    transport: Arc<T>,
    router: Arc<Router<T>>,
    pool: PoolSettings,
    stats: Arc<DispatchStats>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T: DatagramTransport> Dispatcher<T> {
    /// Creates a dispatcher reading from `transport` and routing via `router`.
    #[must_use]
    pub fn new(transport: Arc<T>, router: Arc<Router<T>>, pool: PoolSettings) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            transport,
            router,
            pool: PoolSettings {
                workers: pool.workers.max(1),
                queue_capacity: pool.queue_capacity.max(1),
            },
            stats: Arc::new(DispatchStats::default()),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Handle that stops [`run`](Self::run) from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Shared counters, readable while and after the dispatcher runs.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Runs until shutdown is requested or receiving fails.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ReceiveFailed`] if the transport could no
    /// longer receive. Workers have finished by the time it returns.
    pub async fn run(self) -> Result<(), TransportError> {
        let Self {
            transport,
            router,
            pool,
            stats,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;

        let (job_tx, job_rx) = mpsc::channel::<Job>(pool.queue_capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let workers: Vec<_> = (0..pool.workers)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&job_rx),
                    Arc::clone(&router),
                    Arc::clone(&stats),
                ))
            })
            .collect();

        tracing::info!(
            workers = pool.workers,
            queue_capacity = pool.queue_capacity,
            "dispatcher started"
        );

        // The buffer is reused for every receive; jobs get their own copy.
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let result = loop {
            let received = tokio::select! {
                biased;
                () = shutdown_requested(&mut shutdown_rx) => None,
                received = transport.recv_from(&mut buf) => Some(received),
            };

            match received {
                None => {
                    tracing::info!("shutdown requested, stopping receive loop");
                    break Ok(());
                }
                Some(Ok((len, from))) => {
                    DispatchStats::bump(&stats.received);
                    let job = Job {
                        datagram: buf[..len].to_vec(),
                        from,
                    };
                    if job_tx.try_send(job).is_err() {
                        DispatchStats::bump(&stats.overloaded);
                        tracing::warn!(addr = %from, len, "worker queue full, dropping datagram");
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "receive failed, shutting down");
                    break Err(e);
                }
            }
        };

        // Closing the queue lets workers drain what is left, then exit.
        drop(job_tx);
        for (id, joined) in futures_util::future::join_all(workers)
            .await
            .into_iter()
            .enumerate()
        {
            if let Err(e) = joined {
                tracing::error!(worker = id, error = %e, "worker task failed");
            }
        }

        let counts = stats.counts();
        tracing::info!(
            received = counts.received,
            routed = counts.routed,
            malformed = counts.malformed,
            overloaded = counts.overloaded,
            "dispatcher stopped"
        );
        result
    }
}

/// Resolves once shutdown is requested. Never resolves if every handle
/// is gone without requesting one.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn worker<T: DatagramTransport>(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    router: Arc<Router<T>>,
    stats: Arc<DispatchStats>,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(Job { datagram, from }) = next else {
            break;
        };

        match codec::decode(&datagram) {
            Ok(frame) => {
                DispatchStats::bump(&stats.routed);
                let outcome = router.route(frame, from).await;
                if !outcome.evicted.is_empty() {
                    tracing::debug!(worker = id, evicted = ?outcome.evicted, "sessions evicted");
                }
            }
            Err(e) => {
                DispatchStats::bump(&stats.malformed);
                tracing::warn!(worker = id, addr = %from, error = %e, "dropping malformed datagram");
            }
        }
    }
    tracing::debug!(worker = id, "worker exiting");
}
