//! Forwarding engine.
//!
//! Receives from the subscribe endpoint and republishes every message,
//! unchanged and in receipt order, on the publish endpoint. Failures are
//! per-message: a failed receive is skipped, a failed send drops that
//! message. Neither stops the loop and neither is retried.
//!
//! ```text
//! producers ──▶ SUB (bound) ──▶ Forwarder ──▶ PUB (bound) ──▶ consumers
//! ```

use bytes::Bytes;
use futures::future::{self, Either};
use futures::pin_mut;
use sprelay_core::endpoint::Endpoint;
use sprelay_core::error::{RecvError, RelayError, SendError};
use sprelay_core::transport::{PubSubTransport, PublishHandle, SubscribeHandle};
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Hook into the forwarding loop.
///
/// Observers only watch; they cannot change what the loop does. Every
/// method defaults to a no-op.
pub trait ForwardObserver {
    /// A message was handed to the publish endpoint.
    fn on_forwarded(&self, _msg: &Bytes) {}

    /// Receiving failed; the loop moves on to the next receive.
    fn on_recv_error(&self, _err: &RecvError) {}

    /// Sending failed; the message of `len` bytes is gone.
    fn on_send_error(&self, _len: usize, _err: &SendError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl ForwardObserver for SilentObserver {}

/// Relay counters.
#[derive(Debug, Default)]
pub struct ForwardStats {
    forwarded: AtomicU64,
    recv_errors: AtomicU64,
    send_errors: AtomicU64,
}

impl ForwardStats {
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn recv_errors(&self) -> u64 {
        self.recv_errors.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }
}

/// Observer that counts into [`ForwardStats`] and logs failures at `debug`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    stats: Arc<ForwardStats>,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the counters.
    pub fn stats(&self) -> Arc<ForwardStats> {
        self.stats.clone()
    }
}

impl ForwardObserver for TracingObserver {
    fn on_forwarded(&self, _msg: &Bytes) {
        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    fn on_recv_error(&self, err: &RecvError) {
        self.stats.recv_errors.fetch_add(1, Ordering::Relaxed);
        debug!("Receive failed: {}", err);
    }

    fn on_send_error(&self, len: usize, err: &SendError) {
        self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
        debug!("Dropped {} byte message: {}", len, err);
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Received and handed to the publish endpoint
    Forwarded,
    /// Received, but the send failed and the message was dropped
    Dropped,
    /// Nothing received
    RecvFailed,
}

/// Owns both endpoints and runs the relay loop.
pub struct Forwarder<P, S, O = SilentObserver> {
    publisher: P,
    subscriber: S,
    observer: O,
}

impl<P, S> Forwarder<P, S>
where
    P: PublishHandle,
    S: SubscribeHandle,
{
    /// Wrap already bound endpoints.
    pub fn new(publisher: P, subscriber: S) -> Self {
        Self {
            publisher,
            subscriber,
            observer: SilentObserver,
        }
    }

    /// Bind the publish endpoint, then the subscribe endpoint.
    ///
    /// Either failing is fatal for the relay; nothing is left bound.
    pub async fn bind<T>(transport: &T, pub_endpoint: &str, sub_endpoint: &str) -> Result<Self, RelayError>
    where
        T: PubSubTransport<Publisher = P, Subscriber = S>,
    {
        let pub_ep = Endpoint::parse(pub_endpoint)?;
        let sub_ep = Endpoint::parse(sub_endpoint)?;

        let publisher = transport.bind_publisher(&pub_ep).await?;
        let subscriber = transport.bind_subscriber(&sub_ep).await?;

        info!("Forwarding {} -> {}", sub_ep, pub_ep);
        Ok(Self::new(publisher, subscriber))
    }
}

impl<P, S, O> Forwarder<P, S, O>
where
    P: PublishHandle,
    S: SubscribeHandle,
    O: ForwardObserver,
{
    /// Replace the observer.
    pub fn with_observer<N: ForwardObserver>(self, observer: N) -> Forwarder<P, S, N> {
        Forwarder {
            publisher: self.publisher,
            subscriber: self.subscriber,
            observer,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Receive one message and republish it.
    pub async fn forward_one(&mut self) -> Outcome {
        let msg = match self.subscriber.receive().await {
            Ok(msg) => msg,
            Err(e) => {
                self.observer.on_recv_error(&e);
                return Outcome::RecvFailed;
            }
        };

        let len = msg.len();
        // The publisher takes ownership; keep a refcounted handle for the observer
        match self.publisher.send(msg.clone()).await {
            Ok(()) => {
                self.observer.on_forwarded(&msg);
                Outcome::Forwarded
            }
            Err(e) => {
                self.observer.on_send_error(len, &e);
                Outcome::Dropped
            }
        }
    }

    /// Relay forever.
    pub async fn run(&mut self) -> Infallible {
        loop {
            self.forward_one().await;
        }
    }

    /// Relay until `stop` completes.
    ///
    /// A message already received when `stop` fires is not sent.
    pub async fn run_until<F: Future>(&mut self, stop: F) -> F::Output {
        let relay = self.run();
        pin_mut!(stop, relay);
        // stop is polled first on every wakeup
        match future::select(stop, relay).await {
            Either::Left((out, _)) => out,
            Either::Right((never, _)) => match never {},
        }
    }
}
