//! Bound SUB socket.
//!
//! The socket listens on its endpoint and accepts any number of PUB peers.
//! Each peer is read by its own task on the caller's runtime; decoded
//! messages are funneled into one bounded queue that `recv` drains, so
//! messages from one peer keep their order.
//!
//! # Filtering
//!
//! SP does all subscription matching on the SUB side. A socket with no
//! subscriptions receives nothing; the empty prefix matches every message.

use bytes::Bytes;
use compio::net::TcpListener;
use flume::{Receiver, Sender};
use futures::{select, FutureExt};
use sprelay_core::endpoint::Endpoint;
use sprelay_core::error::{RecvError, RelayError};
use sprelay_core::options::SocketOptions;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use crate::header::Protocol;
use crate::pipe::Pipe;
use crate::publisher::ACCEPT_BACKOFF;

/// Reads one publisher connection until it closes or the socket is dropped
async fn publisher_reader(
    mut pipe: Pipe,
    inbound: Sender<Bytes>,
    shutdown: Receiver<()>,
) {
    let peer = pipe.peer_addr();

    loop {
        let next = select! {
            res = pipe.recv().fuse() => res,
            _ = shutdown.recv_async().fuse() => break,
        };

        match next {
            Ok(Some(message)) => {
                if inbound.send_async(message).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(peer = ?peer, "[SUB] Publisher disconnected");
                break;
            }
            Err(e) if e.is_connection_error() => {
                warn!(peer = ?peer, "[SUB] Dropping misbehaving publisher: {}", e);
                break;
            }
            Err(e) => {
                debug!(peer = ?peer, "[SUB] Publisher connection failed: {}", e);
                break;
            }
        }
    }
}

/// Accepts PUB peers until the socket is dropped
async fn accept_loop(
    listener: TcpListener,
    inbound: Sender<Bytes>,
    options: SocketOptions,
    shutdown: Receiver<()>,
) {
    loop {
        let accepted = select! {
            res = listener.accept().fuse() => res,
            _ = shutdown.recv_async().fuse() => break,
        };

        let (stream, addr) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!("[SUB] Accept failed: {}", e);
                compio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let inbound = inbound.clone();
        let options = options.clone();
        let shutdown = shutdown.clone();

        compio::runtime::spawn(async move {
            match Pipe::accept(stream, addr, Protocol::Sub, &options).await {
                Ok(pipe) => {
                    debug!("[SUB] Publisher attached from {}", addr);
                    publisher_reader(pipe, inbound, shutdown).await;
                }
                Err(e) => debug!("[SUB] Rejected connection from {}: {}", addr, e),
            }
        })
        .detach();
    }

    debug!("[SUB] Accept loop stopped");
}

/// Bound SUB socket
pub struct SubSocket {
    /// Messages from every attached publisher, in per-peer order
    inbound: Receiver<Bytes>,
    /// Subscription prefixes (sorted)
    subscriptions: Vec<Bytes>,
    /// Address the listener is bound to
    local_addr: SocketAddr,
    /// Dropping this stops the accept loop and all readers
    _shutdown: Sender<()>,
}

impl SubSocket {
    /// Bind with default options. Starts with no subscriptions.
    ///
    /// Must be called from inside a compio runtime.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, RelayError> {
        Self::bind_with_options(endpoint, SocketOptions::default()).await
    }

    /// Bind with custom socket options.
    pub async fn bind_with_options(
        endpoint: &Endpoint,
        options: SocketOptions,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(endpoint.socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = flume::bounded(options.recv_hwm.max(1));
        let (shutdown_tx, shutdown_rx) = flume::bounded(1);

        debug!("[SUB] Bound {}", local_addr);

        compio::runtime::spawn(accept_loop(
            listener,
            inbound_tx,
            options,
            shutdown_rx,
        ))
        .detach();

        Ok(Self {
            inbound: inbound_rx,
            subscriptions: Vec::new(),
            local_addr,
            _shutdown: shutdown_tx,
        })
    }

    /// Subscribe to messages with the given prefix.
    ///
    /// An empty prefix subscribes to all messages.
    pub fn subscribe(&mut self, prefix: impl Into<Bytes>) {
        let prefix = prefix.into();
        trace!("[SUB] Adding subscription: {:?}", prefix);
        if !self.subscriptions.contains(&prefix) {
            self.subscriptions.push(prefix);
            self.subscriptions.sort();
        }
    }

    /// Remove a subscription previously added with `subscribe`.
    pub fn unsubscribe(&mut self, prefix: &[u8]) {
        trace!("[SUB] Removing subscription: {:?}", prefix);
        self.subscriptions.retain(|s| s.as_ref() != prefix);
    }

    /// Check if a message matches any subscription.
    fn matches_subscription(&self, msg: &[u8]) -> bool {
        self.subscriptions.iter().any(|sub| msg.starts_with(sub))
    }

    /// Receive the next message that matches the subscriptions.
    ///
    /// Blocks until one arrives; there is no timeout.
    pub async fn recv(&mut self) -> Result<Bytes, RecvError> {
        loop {
            let msg = self
                .inbound
                .recv_async()
                .await
                .map_err(|_| RecvError::Closed)?;

            if self.matches_subscription(&msg) {
                return Ok(msg);
            }
            trace!("[SUB] Message filtered out (no matching subscription)");
        }
    }

    /// Get the local address this socket is bound to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current subscription prefixes.
    #[inline]
    pub fn subscriptions(&self) -> &[Bytes] {
        &self.subscriptions
    }
}
