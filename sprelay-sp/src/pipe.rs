//! An established SP connection.
//!
//! A `Pipe` is a TCP stream on which the 8-byte header exchange has already
//! completed. Bound sockets create one per accepted connection; `connect`
//! dials out, which is how external producers and consumers (and the tests)
//! attach to the daemon.

use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use compio::net::TcpStream;
use sprelay_core::endpoint::Endpoint;
use sprelay_core::error::{RelayError, Result};
use sprelay_core::options::SocketOptions;
use sprelay_core::tcp::apply_stream_options;
use std::io;
use std::net::SocketAddr;
use tracing::{debug, trace};

use crate::codec::{encode_message, SpDecoder};
use crate::header::{Protocol, SpHeader, HEADER_SIZE};

/// Read size used while waiting for a sending-side peer to hang up
const DISCARD_CHUNK: usize = 512;

pub struct Pipe {
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    local: Protocol,
    decoder: SpDecoder,
    /// Bytes read but not yet decoded
    recv_buf: BytesMut,
    /// Reused for every socket read
    read_buf: Vec<u8>,
    read_buf_size: usize,
}

impl Pipe {
    /// Dial `endpoint` and perform the header exchange as `local`.
    pub async fn connect(
        endpoint: &Endpoint,
        local: Protocol,
        options: &SocketOptions,
    ) -> Result<Self> {
        let addr = endpoint.socket_addr();
        let stream = TcpStream::connect(addr).await?;
        apply_stream_options(&stream, options)?;
        debug!("[{}] Connected to {}", local.as_str(), endpoint);
        Self::handshake(stream, Some(addr), local, options).await
    }

    /// Perform the header exchange on an accepted stream.
    pub async fn accept(
        stream: TcpStream,
        peer_addr: SocketAddr,
        local: Protocol,
        options: &SocketOptions,
    ) -> Result<Self> {
        apply_stream_options(&stream, options)?;
        Self::handshake(stream, Some(peer_addr), local, options).await
    }

    async fn handshake(
        mut stream: TcpStream,
        peer_addr: Option<SocketAddr>,
        local: Protocol,
        options: &SocketOptions,
    ) -> Result<Self> {
        let exchange = exchange_headers(&mut stream, local);
        let header = match options.handshake_deadline() {
            None => exchange.await?,
            Some(dur) => compio::time::timeout(dur, exchange)
                .await
                .map_err(|_| RelayError::HandshakeTimeout(dur))??,
        };

        header.check_peer_of(local)?;
        debug!(
            peer = ?peer_addr,
            "[{}] Header exchange complete, peer is {}",
            local.as_str(),
            local.peer().as_str()
        );

        Ok(Self {
            stream,
            peer_addr,
            local,
            decoder: SpDecoder::new(options.max_msg_size),
            recv_buf: BytesMut::with_capacity(options.read_buffer_size),
            read_buf: Vec::with_capacity(options.read_buffer_size),
            read_buf_size: options.read_buffer_size,
        })
    }

    /// Write one message.
    ///
    /// Takes `&self` so a writer can keep a `closed` watch running alongside.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        let mut stream = &self.stream;
        let BufResult(res, _) = stream.write_all(encode_message(payload)).await;
        res?;
        trace!("[{}] Sent {} bytes", self.local.as_str(), payload.len());
        Ok(())
    }

    /// Read the next whole message.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(msg) = self.decoder.decode(&mut self.recv_buf)? {
                trace!("[{}] Received {} bytes", self.local.as_str(), msg.len());
                return Ok(Some(msg));
            }

            let n = self.read_chunk().await?;

            if n == 0 {
                if !self.recv_buf.is_empty() {
                    debug!(
                        "[{}] Peer closed mid-message ({} bytes discarded)",
                        self.local.as_str(),
                        self.recv_buf.len()
                    );
                }
                return Ok(None);
            }

            self.recv_buf.extend_from_slice(&self.read_buf[..n]);
        }
    }

    /// Wait until the peer closes the connection.
    ///
    /// For the sending side of a pipe: SP SUB peers never send anything after
    /// the header, so whatever arrives is discarded. Returns on EOF or on a
    /// read error. Leaves `recv` state untouched.
    pub async fn closed(&self) -> io::Result<()> {
        let mut stream = &self.stream;
        let mut buf: Vec<u8> = Vec::with_capacity(DISCARD_CHUNK);
        loop {
            buf.clear();
            let BufResult(res, back) = AsyncRead::read(&mut stream, buf).await;
            buf = back;
            if res? == 0 {
                return Ok(());
            }
            trace!("[{}] Discarding {} unexpected inbound bytes", self.local.as_str(), buf.len());
        }
    }

    /// One socket read into `read_buf`; returns the byte count.
    async fn read_chunk(&mut self) -> io::Result<usize> {
        // A cancelled read keeps the buffer in the driver; start a fresh one then
        let mut buf = std::mem::take(&mut self.read_buf);
        buf.clear();
        buf.reserve(self.read_buf_size);

        let BufResult(res, buf) = AsyncRead::read(&mut self.stream, buf).await;
        self.read_buf = buf;
        res
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

async fn exchange_headers(stream: &mut TcpStream, local: Protocol) -> Result<SpHeader> {
    let BufResult(res, _) = stream.write_all(SpHeader::new(local).encode()).await;
    res?;

    let BufResult(res, buf) = stream.read_exact([0u8; HEADER_SIZE]).await;
    res?;

    SpHeader::parse(&buf)
}
