/// sprelay Error Types
///
/// `RelayError` covers socket setup and protocol failures. `SendError` and
/// `RecvError` are the per-message failures surfaced by the pub/sub handles;
/// the forwarder swallows them but hands them to its observer.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::endpoint::EndpointError;

/// Main error type for socket setup and protocol handling
#[derive(Error, Debug)]
pub enum RelayError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Endpoint could not be parsed
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    /// Protocol error during header exchange or framing
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Header exchange did not finish in time
    #[error("Handshake timeout after {0:?}")]
    HandshakeTimeout(Duration),

    /// Peer speaks a protocol that cannot talk to ours
    #[error("Incompatible peer: expected protocol {expected:#06x}, got {actual:#06x}")]
    IncompatiblePeer { expected: u16, actual: u16 },

    /// Message too large
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: usize },
}

/// Result type alias for sprelay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Check if the peer broke the protocol, as opposed to the connection failing
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout(_)
                | Self::IncompatiblePeer { .. }
                | Self::MessageTooLarge { .. }
                | Self::Protocol(_)
        )
    }
}

/// Failure to hand a message to a publish endpoint.
#[derive(Error, Debug)]
pub enum SendError {
    /// Every publisher worker has gone away
    #[error("Publish endpoint closed")]
    Closed,

    /// Underlying transport failure
    #[error("Send failed: {0}")]
    Io(#[from] io::Error),
}

/// Failure to take a message from a subscribe endpoint.
#[derive(Error, Debug)]
pub enum RecvError {
    /// The accept task and every connection reader have stopped
    #[error("Subscribe endpoint closed")]
    Closed,

    /// Underlying transport failure
    #[error("Receive failed: {0}")]
    Io(#[from] io::Error),
}
