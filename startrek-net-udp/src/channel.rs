//! A non-blocking UDP `Channel`.
//!
//! Unlike TCP, a UDP channel may be only bound (a server socket receiving
//! from many peers) or both bound and connected (a socket that has fixed a
//! single remote peer via `connect`, after which the OS filters incoming
//! datagrams to that peer). `receive`/`send_to` serve the unconnected case;
//! `read`/`send` serve the connected case.

use std::io::ErrorKind;
use std::net::UdpSocket;

use tracing::trace;

use startrek_core::{Channel, ErrorCategory, ReadOutcome, SocketAddress, TransportError};

pub struct UdpChannel {
    socket: Option<UdpSocket>,
    blocking: bool,
    remote: Option<SocketAddress>,
    local: Option<SocketAddress>,
}

impl UdpChannel {
    pub fn bind(local: SocketAddress) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", local.host(), local.port());
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let bound = socket
            .local_addr()
            .map(SocketAddress::from)
            .unwrap_or(local);
        Ok(Self {
            socket: Some(socket),
            blocking: false,
            remote: None,
            local: Some(bound),
        })
    }

    fn require_socket(&self) -> Result<&UdpSocket, TransportError> {
        self.socket
            .as_ref()
            .ok_or_else(|| TransportError::closed("udp channel has no underlying socket"))
    }
}

impl Channel for UdpChannel {
    fn remote(&self) -> Option<SocketAddress> {
        self.remote.clone()
    }

    fn local(&self) -> Option<SocketAddress> {
        self.local.clone()
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
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
        let socket = self.require_socket()?;
        socket.set_nonblocking(!blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    fn bind(&mut self, local: SocketAddress) -> Result<(), TransportError> {
        let addr = format!("{}:{}", local.host(), local.port());
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(!self.blocking)?;
        self.local = socket.local_addr().ok().map(SocketAddress::from).or(Some(local));
        self.socket = Some(socket);
        Ok(())
    }

    fn connect(&mut self, remote: SocketAddress) -> Result<(), TransportError> {
        let socket = self.require_socket()?;
        let addr = format!("{}:{}", remote.host(), remote.port());
        socket.connect(addr)?;
        self.remote = Some(remote);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.remote = None;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        let socket = self.require_socket()?;
        match socket.recv(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => {
                trace!(target: "startrek::net_udp", error = %e, "read failed");
                Err(e.into())
            }
        }
    }

    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(ReadOutcome, Option<SocketAddress>), TransportError> {
        let socket = self.require_socket()?;
        match socket.recv_from(buf) {
            Ok((n, from)) => {
                let outcome = if n == 0 {
                    ReadOutcome::Eof
                } else {
                    ReadOutcome::Data(n)
                };
                Ok((outcome, Some(SocketAddress::from(from))))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok((ReadOutcome::WouldBlock, None)),
            Err(e) => {
                trace!(target: "startrek::net_udp", error = %e, "receive failed");
                Err(e.into())
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.remote.is_none() {
            return Err(TransportError::new(
                ErrorCategory::IllegalArgument,
                "send requires a connected remote peer; use send_to otherwise",
            ));
        }
        let socket = self.require_socket()?;
        match socket.send(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TransportError::would_block()),
            Err(e) => Err(e.into()),
        }
    }

    fn send_to(&mut self, buf: &[u8], target: &SocketAddress) -> Result<usize, TransportError> {
        let socket = self.require_socket()?;
        let addr = format!("{}:{}", target.host(), target.port());
        match socket.send_to(buf, addr) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TransportError::would_block()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        self.remote = None;
        self.local = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_datagram_round_trip() {
        let mut a = UdpChannel::bind(SocketAddress::new("127.0.0.1", 0)).unwrap();
        let mut b = UdpChannel::bind(SocketAddress::new("127.0.0.1", 0)).unwrap();
        let b_addr = b.local().unwrap();

        a.send_to(b"hello", &b_addr).unwrap();

        let mut buf = [0u8; 16];
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match b.receive(&mut buf).unwrap() {
                (ReadOutcome::Data(n), Some(_from)) => {
                    assert_eq!(&buf[..n], b"hello");
                    break;
                }
                _ if std::time::Instant::now() < deadline => continue,
                _ => panic!("timed out waiting for loopback datagram"),
            }
        }
    }
}
