//! Byte transport used by the HTTP layer.
//!
//! # Design
//! `Transport` is the socket seam: connect to a host and port, send a
//! buffer, receive into a caller-provided buffer, disconnect. The HTTP
//! request function only ever talks to this trait, so tests can script a
//! transport in memory and production code uses `TcpTransport`.
//!
//! A transport object is reused across requests. Each request connects,
//! does one round trip and disconnects; there is no connection reuse.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;

/// A blocking, connection-oriented byte transport.
pub trait Transport {
    /// Open a connection to `host:port`.
    fn connect(&mut self, port: u16, host: &str) -> Result<(), TransportError>;

    /// Send the whole buffer, returning the number of bytes written.
    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Receive into `buf`. `Ok(0)` means the peer closed the connection.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close the connection. Calling this while disconnected is a no-op.
    fn disconnect(&mut self);
}

/// An open connection scoped to one request.
///
/// Dropping the session disconnects the transport, so every exit path of a
/// request releases the socket.
pub(crate) struct Session<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> Session<'a, T> {
    pub(crate) fn open(transport: &'a mut T, port: u16, host: &str) -> Result<Self, TransportError> {
        transport.connect(port, host)?;
        Ok(Self { transport })
    }

    pub(crate) fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        self.transport.send(buf)
    }

    pub(crate) fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.transport.receive(buf)
    }
}

impl<T: Transport + ?Sized> Drop for Session<'_, T> {
    fn drop(&mut self) {
        self.transport.disconnect();
    }
}

/// `Transport` over a plain `std::net::TcpStream`.
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound how long connecting to each resolved address may take.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bound how long a single send or receive may block.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn open_stream(&self, port: u16, host: &str) -> Result<TcpStream, TransportError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::connect(format!("{host}:{port}: {e}")))?;

        let mut last_error = None;
        for addr in addrs {
            let attempt = match self.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => TransportError::connect(format!("{host}:{port}: {e}")),
            None => TransportError::connect(format!("{host}:{port}: no addresses resolved")),
        })
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, port: u16, host: &str) -> Result<(), TransportError> {
        self.disconnect();
        let stream = self.open_stream(port, host)?;
        stream
            .set_read_timeout(self.io_timeout)
            .and_then(|()| stream.set_write_timeout(self.io_timeout))
            .map_err(|e| TransportError::connect(e.to_string()))?;
        debug!(host, port, "connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::send("not connected"))?;
        stream
            .write_all(buf)
            .map_err(|e| TransportError::send(e.to_string()))?;
        Ok(buf.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TransportError::receive("not connected"))?;
        stream
            .read(buf)
            .map_err(|e| TransportError::receive(e.to_string()))
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already have closed its side.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
