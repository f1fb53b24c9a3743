//! Pub/sub transport seam.
//!
//! The forwarder only ever sees these traits. The concrete transport (SP over
//! TCP in `sprelay-sp`) is picked when the daemon is built, not inside the
//! relay loop.
//!
//! Note: the traits target single-threaded async runtimes like compio and do
//! not require `Send`.

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::error::{RecvError, RelayError, SendError};

/// Outbound side: broadcasts every message to all attached subscribers.
#[async_trait::async_trait(?Send)]
pub trait PublishHandle {
    /// Hand one message to the transport for fan-out.
    ///
    /// Returns once the transport has taken the message; delivery to each
    /// subscriber happens afterwards and is not reported back.
    async fn send(&mut self, msg: Bytes) -> Result<(), SendError>;
}

/// Inbound side: yields messages matching the handle's subscriptions.
#[async_trait::async_trait(?Send)]
pub trait SubscribeHandle {
    /// Wait for the next message. There is no timeout.
    async fn receive(&mut self) -> Result<Bytes, RecvError>;
}

/// Factory for bound publish/subscribe endpoints.
#[async_trait::async_trait(?Send)]
pub trait PubSubTransport {
    type Publisher: PublishHandle;
    type Subscriber: SubscribeHandle;

    /// Bind a publish endpoint at `endpoint`.
    async fn bind_publisher(&self, endpoint: &Endpoint) -> Result<Self::Publisher, RelayError>;

    /// Bind a subscribe endpoint at `endpoint`, subscribed to everything.
    async fn bind_subscriber(&self, endpoint: &Endpoint) -> Result<Self::Subscriber, RelayError>;
}
