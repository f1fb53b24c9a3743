//! `PubSubTransport` implementation over SP/TCP.

use bytes::Bytes;
use sprelay_core::endpoint::Endpoint;
use sprelay_core::error::{RecvError, RelayError, SendError};
use sprelay_core::options::SocketOptions;
use sprelay_core::transport::{PubSubTransport, PublishHandle, SubscribeHandle};
use tracing::info;

use crate::publisher::PubSocket;
use crate::subscriber::SubSocket;

/// SP over TCP, wire-compatible with nanomsg, nng and mangos peers.
#[derive(Debug, Clone)]
pub struct SpTransport {
    /// Publisher worker threads (the parallelism hint)
    workers: usize,
    options: SocketOptions,
}

impl SpTransport {
    pub fn new(workers: usize, options: SocketOptions) -> Self {
        Self {
            workers: workers.max(1),
            options,
        }
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    #[inline]
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }
}

impl Default for SpTransport {
    fn default() -> Self {
        Self::new(num_cpus::get(), SocketOptions::default())
    }
}

#[async_trait::async_trait(?Send)]
impl PubSubTransport for SpTransport {
    type Publisher = PubSocket;
    type Subscriber = SubSocket;

    async fn bind_publisher(&self, endpoint: &Endpoint) -> Result<PubSocket, RelayError> {
        let socket = PubSocket::bind_with_options(endpoint, self.workers, self.options.clone()).await?;
        info!("Publishing on {} ({} workers)", endpoint, socket.worker_count());
        Ok(socket)
    }

    async fn bind_subscriber(&self, endpoint: &Endpoint) -> Result<SubSocket, RelayError> {
        let mut socket = SubSocket::bind_with_options(endpoint, self.options.clone()).await?;
        socket.subscribe(Bytes::new());
        info!("Subscribed to everything on {}", endpoint);
        Ok(socket)
    }
}

#[async_trait::async_trait(?Send)]
impl PublishHandle for PubSocket {
    async fn send(&mut self, msg: Bytes) -> Result<(), SendError> {
        PubSocket::send(self, msg).await
    }
}

#[async_trait::async_trait(?Send)]
impl SubscribeHandle for SubSocket {
    async fn receive(&mut self) -> Result<Bytes, RecvError> {
        self.recv().await
    }
}
