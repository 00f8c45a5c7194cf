//! A non-blocking TCP listener that yields [`TcpChannel`]s on accept.

use std::io::ErrorKind;
use std::net::TcpListener;

use startrek_core::{SocketAddress, TransportError};

use crate::channel::TcpChannel;

/// Wraps `std::net::TcpListener` in non-blocking mode. Not a `Channel`
/// itself — it produces channels via [`TcpListenerChannel::accept`], polled
/// once per Gate tick the same way a `Channel::read` is polled.
pub struct TcpListenerChannel {
    listener: TcpListener,
    local: SocketAddress,
}

impl TcpListenerChannel {
    pub fn bind(local: SocketAddress) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", local.host(), local.port());
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let bound = listener
            .local_addr()
            .map(SocketAddress::from)
            .unwrap_or(local);
        Ok(Self {
            listener,
            local: bound,
        })
    }

    pub fn local(&self) -> &SocketAddress {
        &self.local
    }

    /// Accepts a pending connection, if any. Returns `Ok(None)` rather than a
    /// `WouldBlock` error, since "nothing to accept yet" is this listener's
    /// expected steady state.
    pub fn accept(&self) -> Result<Option<TcpChannel>, TransportError> {
        match self.listener.accept() {
            Ok((stream, _peer)) => Ok(Some(TcpChannel::from_stream(stream)?)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
