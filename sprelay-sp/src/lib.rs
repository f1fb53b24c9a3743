//! Scalability Protocols (SP) PUB/SUB sockets over TCP.
//!
//! Implements the subset of the nanomsg SP TCP mapping sprelay needs:
//!
//! - `header`: 8-byte connection header and protocol compatibility
//! - `codec`: `u64` length-prefixed message framing
//! - `pipe`: one established connection (accepted or dialed)
//! - `publisher`: bound PUB socket, fan-out through a worker pool
//! - `subscriber`: bound SUB socket, fan-in with prefix filtering
//! - `transport`: the `PubSubTransport` implementation used by the daemon
//!
//! All sockets run on compio; `bind` must be called inside a compio runtime.

pub mod codec;
pub mod header;
pub mod pipe;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use header::Protocol;
pub use pipe::Pipe;
pub use publisher::PubSocket;
pub use subscriber::SubSocket;
pub use transport::SpTransport;
