//! TCP utilities.
//!
//! # Safety
//!
//! compio streams do not expose socket options, so the raw descriptor is
//! borrowed into a `socket2::Socket` for the duration of one call and then
//! forgotten so the descriptor is not closed twice.

#![allow(unsafe_code)]

use std::io;

use crate::options::SocketOptions;

/// Enable TCP_NODELAY on a compio TcpStream.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn enable_tcp_nodelay(stream: &compio::net::TcpStream) -> io::Result<()> {
    with_socket(stream, |sock| sock.set_nodelay(true))
}

/// Apply the stream-level parts of `options` to a freshly accepted or
/// connected stream.
pub fn apply_stream_options(
    stream: &compio::net::TcpStream,
    options: &SocketOptions,
) -> io::Result<()> {
    if options.tcp_nodelay {
        enable_tcp_nodelay(stream)?;
    }
    Ok(())
}

fn with_socket<T>(
    stream: &compio::net::TcpStream,
    f: impl FnOnce(&socket2::Socket) -> io::Result<T>,
) -> io::Result<T> {
    #[cfg(unix)]
    {
        use std::os::unix::io::{AsRawFd, FromRawFd};
        let sock = unsafe { socket2::Socket::from_raw_fd(stream.as_raw_fd()) };
        let result = f(&sock);
        std::mem::forget(sock);
        result
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{AsRawSocket, FromRawSocket};
        let sock = unsafe { socket2::Socket::from_raw_socket(stream.as_raw_socket()) };
        let result = f(&sock);
        std::mem::forget(sock);
        result
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (stream, f);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "socket options are not available on this platform",
        ))
    }
}
