/// Bound PUB socket with worker pool.
///
/// The socket listens on its endpoint and accepts any number of SUB peers.
/// Accepted peers are spread round-robin over a pool of worker threads, each
/// running its own compio runtime, so one slow peer never stalls the caller
/// or the other workers.
///
/// ## Architecture:
///
/// ```text
/// Caller runtime                   Worker threads (pool size = parallelism hint)
/// ┌──────────────────┐            ┌───────────────────────────────────┐
/// │ accept task      │──AddSub───▶│ Worker 0: subscriber 1, 3, 5, ... │
/// │  (header xchg)   │            │  per-subscriber queue + writer    │
/// │                  │            └───────────────────────────────────┘
/// │ PubSocket::send  │──Broadcast▶┌───────────────────────────────────┐
/// └──────────────────┘            │ Worker 1: subscriber 2, 4, 6, ... │
///                                 └───────────────────────────────────┘
/// ```
///
/// ## Delivery semantics (same as nanomsg PUB):
/// - Every attached subscriber gets every message (fan-out, not load balancing)
/// - A subscriber that attaches later never sees earlier messages
/// - Each subscriber has a queue of `send_hwm` messages; when it is full the
///   message is dropped for that subscriber only
/// - `send` never waits for a subscriber
/// - A subscriber that hangs up is dropped right away, traffic or not
use bytes::Bytes;
use compio::net::TcpListener;
use flume::{Receiver, Sender, TrySendError};
use futures::{pin_mut, select, FutureExt};
use sprelay_core::endpoint::Endpoint;
use sprelay_core::error::{RelayError, SendError};
use sprelay_core::options::SocketOptions;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use crate::header::Protocol;
use crate::pipe::Pipe;

/// Unique identifier for each subscriber connection
type SubscriberId = u64;

/// Pause after a failed accept (EMFILE and friends) before trying again
pub(crate) const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Commands sent from the socket to worker threads
enum WorkerCommand {
    /// Add a new subscriber to this worker
    AddSubscriber { id: SubscriberId, pipe: Pipe },
    /// Broadcast a message to all subscribers in this worker
    Broadcast { message: Bytes },
    /// Shutdown the worker
    Shutdown,
}

/// Worker thread that owns a subset of the subscribers
fn worker_thread(
    worker_id: usize,
    rx: Receiver<WorkerCommand>,
    send_hwm: usize,
    subscriber_count: Arc<AtomicUsize>,
) {
    debug!("[Worker {}] Starting", worker_id);

    let rt = match compio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("[Worker {}] Failed to create runtime: {}", worker_id, e);
            return;
        }
    };

    rt.block_on(async move {
        let mut subscribers: HashMap<SubscriberId, Sender<Bytes>> = HashMap::new();
        // Writers report here when their connection ends
        let (gone_tx, gone_rx) = flume::unbounded::<SubscriberId>();

        let remove = |subscribers: &mut HashMap<SubscriberId, Sender<Bytes>>, id: SubscriberId| {
            if subscribers.remove(&id).is_some() {
                subscriber_count.fetch_sub(1, Ordering::Relaxed);
                debug!("[Worker {}] Removed subscriber {}", worker_id, id);
            }
        };

        loop {
            let command = select! {
                cmd = rx.recv_async().fuse() => cmd,
                gone = gone_rx.recv_async().fuse() => {
                    if let Ok(id) = gone {
                        remove(&mut subscribers, id);
                    }
                    continue;
                }
            };

            match command {
                Ok(WorkerCommand::AddSubscriber { id, pipe }) => {
                    debug!("[Worker {}] Adding subscriber {}", worker_id, id);
                    let (tx, queue) = flume::bounded(send_hwm);
                    compio::runtime::spawn(subscriber_writer(pipe, queue, id, gone_tx.clone())).detach();
                    subscribers.insert(id, tx);
                }
                Ok(WorkerCommand::Broadcast { message }) => {
                    let mut dead = Vec::new();
                    for (id, tx) in &subscribers {
                        match tx.try_send(message.clone()) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                trace!("[Worker {}] Subscriber {} at HWM, message dropped", worker_id, id);
                            }
                            Err(TrySendError::Disconnected(_)) => dead.push(*id),
                        }
                    }
                    for id in dead {
                        remove(&mut subscribers, id);
                    }
                }
                Ok(WorkerCommand::Shutdown) => {
                    debug!("[Worker {}] Shutting down", worker_id);
                    break;
                }
                Err(_) => {
                    debug!("[Worker {}] Channel closed, exiting", worker_id);
                    break;
                }
            }
        }
    });

    debug!("[Worker {}] Stopped", worker_id);
}

/// Drains one subscriber's queue onto its connection (runs in the worker's runtime).
///
/// Also watches the connection so a peer that hangs up on an idle relay is
/// released without waiting for the next failed write.
async fn subscriber_writer(
    pipe: Pipe,
    queue: Receiver<Bytes>,
    id: SubscriberId,
    gone: Sender<SubscriberId>,
) {
    let closed = pipe.closed().fuse();
    pin_mut!(closed);

    loop {
        select! {
            msg = queue.recv_async().fuse() => {
                let Ok(message) = msg else { break };
                if let Err(e) = pipe.send(&message).await {
                    debug!("[PUB] Subscriber {} send failed: {}", id, e);
                    break;
                }
            }
            res = closed => {
                match res {
                    Ok(()) => debug!("[PUB] Subscriber {} disconnected", id),
                    Err(e) => debug!("[PUB] Subscriber {} read failed: {}", id, e),
                }
                break;
            }
        }
    }

    trace!("[PUB] Subscriber {} writer finished", id);
    let _ = gone.send(id);
}

/// Accepts SUB peers until the socket is dropped (runs in the caller's runtime)
async fn accept_loop(
    listener: TcpListener,
    workers: Vec<Sender<WorkerCommand>>,
    options: SocketOptions,
    subscriber_count: Arc<AtomicUsize>,
    shutdown: Receiver<()>,
) {
    let mut next_id: SubscriberId = 1;
    let mut next_worker = 0usize;

    loop {
        let accepted = select! {
            res = listener.accept().fuse() => res,
            _ = shutdown.recv_async().fuse() => break,
        };

        let (stream, addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("[PUB] Accept failed: {}", e);
                compio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let id = next_id;
        next_id += 1;
        let worker = workers[next_worker].clone();
        next_worker = (next_worker + 1) % workers.len();
        let options = options.clone();
        let subscriber_count = subscriber_count.clone();

        // Header exchange off the accept path so a stalled peer cannot block others
        compio::runtime::spawn(async move {
            match Pipe::accept(stream, addr, Protocol::Pub, &options).await {
                Ok(pipe) => {
                    subscriber_count.fetch_add(1, Ordering::Relaxed);
                    if worker.send(WorkerCommand::AddSubscriber { id, pipe }).is_err() {
                        subscriber_count.fetch_sub(1, Ordering::Relaxed);
                        warn!("[PUB] Worker gone, dropping subscriber {} from {}", id, addr);
                    } else {
                        debug!("[PUB] Subscriber {} attached from {}", id, addr);
                    }
                }
                Err(e) => debug!("[PUB] Rejected connection from {}: {}", addr, e),
            }
        })
        .detach();
    }

    debug!("[PUB] Accept loop stopped");
}

/// Bound PUB socket
pub struct PubSocket {
    /// Worker thread channels
    workers: Vec<Sender<WorkerCommand>>,
    /// Address the listener is bound to
    local_addr: SocketAddr,
    /// Attached subscribers across all workers
    subscriber_count: Arc<AtomicUsize>,
    /// Dropping this stops the accept loop
    _shutdown: Sender<()>,
}

impl PubSocket {
    /// Bind with one worker per CPU core.
    ///
    /// Must be called from inside a compio runtime: the accept loop is
    /// spawned on the current runtime.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, RelayError> {
        Self::bind_with_options(endpoint, num_cpus::get(), SocketOptions::default()).await
    }

    /// Bind with a specific number of worker threads and socket options.
    pub async fn bind_with_options(
        endpoint: &Endpoint,
        worker_count: usize,
        options: SocketOptions,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(endpoint.socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        let worker_count = worker_count.max(1);
        let subscriber_count = Arc::new(AtomicUsize::new(0));

        debug!("[PUB] Bound {}, starting {} worker threads", local_addr, worker_count);

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (tx, rx) = flume::unbounded();
            let hwm = options.send_hwm.max(1);
            let count = subscriber_count.clone();
            thread::Builder::new()
                .name(format!("pub-worker-{}", i))
                .spawn(move || worker_thread(i, rx, hwm, count))?;
            workers.push(tx);
        }

        let (shutdown_tx, shutdown_rx) = flume::bounded(1);
        compio::runtime::spawn(accept_loop(
            listener,
            workers.clone(),
            options,
            subscriber_count.clone(),
            shutdown_rx,
        ))
        .detach();

        Ok(Self {
            workers,
            local_addr,
            subscriber_count,
            _shutdown: shutdown_tx,
        })
    }

    /// Broadcast a message to every attached subscriber.
    ///
    /// The message is shared (refcounted) across workers, never copied per
    /// subscriber. With no subscribers attached the message is discarded.
    /// Fails only when no worker is left to take it.
    pub async fn send(&mut self, message: Bytes) -> Result<(), SendError> {
        if self.subscriber_count() == 0 {
            trace!("[PUB] No subscribers, discarding {} bytes", message.len());
            return Ok(());
        }

        trace!("[PUB] Broadcasting {} bytes to {} workers", message.len(), self.workers.len());

        let mut delivered = 0;
        for worker in &self.workers {
            if worker
                .send(WorkerCommand::Broadcast {
                    message: message.clone(),
                })
                .is_ok()
            {
                delivered += 1;
            }
        }

        if delivered == 0 {
            return Err(SendError::Closed);
        }
        if delivered < self.workers.len() {
            // The live workers have the message; only the dead ones' subscribers miss it
            warn!(
                "[PUB] {} of {} workers are gone, message reached the rest",
                self.workers.len() - delivered,
                self.workers.len()
            );
        }
        Ok(())
    }

    /// Number of attached subscribers.
    #[inline]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Get the local address this socket is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PubSocket {
    fn drop(&mut self) {
        debug!("[PUB] Shutting down {} workers", self.workers.len());
        for worker in &self.workers {
            let _ = worker.send(WorkerCommand::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_with(workers: Vec<Sender<WorkerCommand>>) -> PubSocket {
        let (shutdown, _rx) = flume::bounded(1);
        PubSocket {
            workers,
            local_addr: "127.0.0.1:0".parse().unwrap(),
            subscriber_count: Arc::new(AtomicUsize::new(1)),
            _shutdown: shutdown,
        }
    }

    #[compio::test]
    async fn test_send_succeeds_when_some_workers_are_gone() {
        let (live_tx, live_rx) = flume::unbounded();
        let (dead_tx, dead_rx) = flume::unbounded();
        drop(dead_rx);
        let mut socket = socket_with(vec![dead_tx, live_tx]);

        socket.send(Bytes::from_static(b"partial")).await.unwrap();

        match live_rx.try_recv() {
            Ok(WorkerCommand::Broadcast { message }) => assert_eq!(message, "partial"),
            _ => panic!("live worker did not get the broadcast"),
        }
    }

    #[compio::test]
    async fn test_send_fails_when_every_worker_is_gone() {
        let (tx, rx) = flume::unbounded();
        drop(rx);
        let mut socket = socket_with(vec![tx]);

        let result = socket.send(Bytes::from_static(b"lost")).await;
        assert!(matches!(result, Err(SendError::Closed)));
    }
}
