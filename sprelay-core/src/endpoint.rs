//! Endpoint abstraction for socket addressing.
//!
//! Addresses use the nanomsg URL form `scheme://address`. Only the TCP
//! transport is carried by sprelay; the other SP schemes are recognized so
//! that a misconfigured daemon reports something more useful than a parse
//! failure.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::str::FromStr;

/// SP schemes that exist in the nanomsg family but are not served here.
const KNOWN_SCHEMES: &[&str] = &["ipc", "inproc", "ws", "wss", "tls+tcp", "tcp4", "tcp6"];

/// Transport endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport: `tcp://host:port`
    Tcp(SocketAddr),
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// Supported formats:
    /// - `tcp://127.0.0.1:19018`
    /// - `tcp://[::1]:19018` (IPv6)
    /// - `tcp://*:19018` (all interfaces)
    /// - `tcp://localhost:19018` (resolved once, first address wins)
    ///
    /// # Examples
    ///
    /// ```
    /// use sprelay_core::endpoint::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("tcp://127.0.0.1:19018").unwrap();
    /// assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:19018");
    ///
    /// let any = Endpoint::parse("tcp://*:19018").unwrap();
    /// assert_eq!(any.socket_addr().port(), 19018);
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// Socket address to bind or connect to.
    pub fn socket_addr(&self) -> SocketAddr {
        match self {
            Endpoint::Tcp(addr) => *addr,
        }
    }
}

fn parse_tcp(addr: &str) -> Result<SocketAddr, EndpointError> {
    if let Some(port) = addr.strip_prefix("*:") {
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::InvalidTcpAddress(addr.to_string()))?;
        return Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)));
    }

    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Ok(socket_addr);
    }

    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| EndpointError::InvalidTcpAddress(addr.to_string()))
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Err(EndpointError::InvalidScheme(s.to_string()));
        };

        match scheme {
            "tcp" => parse_tcp(rest).map(Endpoint::Tcp),
            known if KNOWN_SCHEMES.contains(&known) => {
                Err(EndpointError::UnsupportedTransport(known.to_string()))
            }
            _ => Err(EndpointError::InvalidScheme(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

/// Errors that can occur when parsing endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid scheme in endpoint: {0} (expected tcp://)")]
    InvalidScheme(String),

    #[error("Invalid TCP address: {0}")]
    InvalidTcpAddress(String),

    #[error("Transport {0}:// is not supported by sprelay")]
    UnsupportedTransport(String),
}
