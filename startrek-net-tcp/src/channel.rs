//! A non-blocking TCP `Channel`.
//!
//! ## Intent (Why)
//! - `spec.md` models Channel I/O as never blocking the driver thread; TCP's
//!   natural OS-level knob for that is `set_nonblocking(true)`, checked once
//!   at construction rather than per call.
//!
//! ## How
//! - Wraps `std::net::TcpStream`; `read`/`send` translate `WouldBlock` I/O
//!   errors into `ReadOutcome::WouldBlock` / a would-block `TransportError`
//!   rather than letting them surface as generic I/O failures.
//! - `socket2::SockRef` is used only for `SO_LINGER`/`TCP_NODELAY`-style
//!   socket options that `std::net` does not expose directly.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};

use socket2::SockRef;
use tracing::trace;

use startrek_core::{Channel, ErrorCategory, ReadOutcome, SocketAddress, TransportError};

/// A connected (or connecting) TCP channel.
pub struct TcpChannel {
    stream: Option<TcpStream>,
    blocking: bool,
    remote: Option<SocketAddress>,
    local: Option<SocketAddress>,
}

impl TcpChannel {
    /// Wraps an already-connected stream, e.g. one accepted by
    /// [`crate::listener::TcpListenerChannel`].
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nonblocking(true)?;
        let remote = stream.peer_addr().ok().map(SocketAddress::from);
        let local = stream.local_addr().ok().map(SocketAddress::from);
        Ok(Self {
            stream: Some(stream),
            blocking: false,
            remote,
            local,
        })
    }

    /// Sets `TCP_NODELAY`, disabling Nagle's algorithm. Most interactive
    /// transport users of this crate want latency over bandwidth efficiency.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<(), TransportError> {
        let stream = self.require_stream()?;
        stream.set_nodelay(nodelay)?;
        Ok(())
    }

    /// Sets `SO_LINGER`, controlling whether `close` waits for pending writes
    /// to flush (`Some(duration)`) or resets the connection immediately
    /// (`Some(Duration::ZERO)`). `None` defers to the OS default.
    pub fn set_linger(&self, linger: Option<std::time::Duration>) -> Result<(), TransportError> {
        let stream = self.require_stream()?;
        let sock = SockRef::from(stream);
        sock.set_linger(linger)?;
        Ok(())
    }

    fn require_stream(&self) -> Result<&TcpStream, TransportError> {
        self.stream
            .as_ref()
            .ok_or_else(|| TransportError::closed("tcp channel has no underlying stream"))
    }

    fn require_stream_mut(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::closed("tcp channel has no underlying stream"))
    }
}

impl Channel for TcpChannel {
    fn remote(&self) -> Option<SocketAddress> {
        self.remote.clone()
    }

    fn local(&self) -> Option<SocketAddress> {
        self.local.clone()
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn is_bound(&self) -> bool {
        self.local.is_some()
    }

    fn is_connected(&self) -> bool {
        self.remote.is_some()
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }

    fn set_blocking(&mut self, blocking: bool) -> Result<(), TransportError> {
        let stream = self.require_stream_mut()?;
        stream.set_nonblocking(!blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    fn bind(&mut self, _local: SocketAddress) -> Result<(), TransportError> {
        Err(TransportError::new(
            ErrorCategory::IllegalArgument,
            "tcp channels bind implicitly via connect or accept",
        ))
    }

    fn connect(&mut self, remote: SocketAddress) -> Result<(), TransportError> {
        let addr = format!("{}:{}", remote.host(), remote.port());
        let stream = TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        self.local = stream.local_addr().ok().map(SocketAddress::from);
        self.remote = Some(remote);
        self.stream = Some(stream);
        self.blocking = false;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.remote = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        let stream = self.require_stream_mut()?;
        match stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => {
                trace!(target: "startrek::net_tcp", error = %e, "read failed");
                Err(e.into())
            }
        }
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(ReadOutcome, Option<SocketAddress>), TransportError> {
        let remote = self.remote.clone();
        Ok((self.read(buf)?, remote))
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let stream = self.require_stream_mut()?;
        match stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TransportError::would_block()),
            Err(e) => Err(e.into()),
        }
    }

    fn send_to(&mut self, buf: &[u8], target: &SocketAddress) -> Result<usize, TransportError> {
        match &self.remote {
            Some(remote) if remote == target => self.send(buf),
            _ => Err(TransportError::new(
                ErrorCategory::IllegalArgument,
                "tcp channels can only send to their connected peer",
            )),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.remote = None;
        self.local = None;
        Ok(())
    }
}
