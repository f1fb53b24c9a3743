//! Socket configuration options
//!
//! Tuning knobs for the bound PUB/SUB sockets, named after their nanomsg
//! counterparts (NN_SNDBUF, NN_RCVMAXSIZE, ...) where one exists.

use std::time::Duration;

/// Default per-subscriber outbound queue depth, in messages.
pub const DEFAULT_SEND_HWM: usize = 1000;

/// Default inbound queue depth, in messages.
pub const DEFAULT_RECV_HWM: usize = 1000;

/// Default largest accepted inbound message (1 MiB, same as nanomsg).
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024 * 1024;

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use sprelay_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_send_hwm(64)
///     .with_handshake_timeout(Duration::from_secs(2));
/// assert_eq!(opts.send_hwm, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Handshake timeout
    ///
    /// Maximum time to complete the SP header exchange after accept/connect.
    /// - Default: 10 seconds
    /// - `Duration::ZERO` disables the timeout
    pub handshake_timeout: Duration,

    /// High water mark for sending
    ///
    /// Messages queued per subscriber before the publisher starts dropping
    /// for that subscriber. Clamped to at least 1.
    pub send_hwm: usize,

    /// High water mark for receiving
    ///
    /// Messages queued between connection readers and `recv()`. Readers wait
    /// when it is full, which pushes back on the TCP connection.
    pub recv_hwm: usize,

    /// Maximum inbound message size (NN_RCVMAXSIZE)
    ///
    /// - `None`: No limit
    /// - `Some(size)`: Drop the connection of a peer announcing a larger message
    pub max_msg_size: Option<usize>,

    /// Read buffer size (bytes)
    pub read_buffer_size: usize,

    /// Disable Nagle's algorithm on accepted/connected streams
    pub tcp_nodelay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            send_hwm: DEFAULT_SEND_HWM,
            recv_hwm: DEFAULT_RECV_HWM,
            max_msg_size: Some(DEFAULT_MAX_MSG_SIZE),
            read_buffer_size: 8192,
            tcp_nodelay: true,
        }
    }
}

impl SocketOptions {
    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-subscriber send high water mark.
    #[must_use]
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm.max(1);
        self
    }

    /// Set the inbound high water mark.
    #[must_use]
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm.max(1);
        self
    }

    /// Set the maximum inbound message size (`None` = unlimited).
    #[must_use]
    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(64);
        self
    }

    /// Enable or disable TCP_NODELAY.
    #[must_use]
    pub fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Handshake timeout as an option, `None` when disabled.
    #[inline]
    pub fn handshake_deadline(&self) -> Option<Duration> {
        (!self.handshake_timeout.is_zero()).then_some(self.handshake_timeout)
    }
}
