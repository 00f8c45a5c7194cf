//! Channel/Connection container and I/O driver (spec.md §4.8).
//!
//! A Hub owns both registries by address pair and is the only place that
//! actually touches a socket: `tick()` drains every live Channel and hands
//! bytes to the Connection that owns that peer, then advances every
//! Connection's state machine.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{trace, warn};

use startrek_core::{AddressPair, Channel, Clock, ReadOutcome, SocketAddress, TransportError};
use startrek_net_tcp::TcpChannel;
use startrek_net_udp::UdpChannel;

use crate::connection::{Connection, ConnectionDelegate, ConnectionState, SharedChannel};

/// Opens the transport-specific socket behind a `SharedChannel`. Kept
/// separate from `Hub` so the Hub itself stays transport-agnostic — it only
/// ever drives the `Channel` trait, never `std::net` directly (spec.md
/// §4.2's "any concrete transport" external-interfaces note).
pub trait ChannelFactory: Send + Sync {
    fn open(&self, remote: &SocketAddress, local: &SocketAddress) -> Result<SharedChannel, TransportError>;
}

fn boxed(channel: impl Channel + 'static) -> SharedChannel {
    Arc::new(Mutex::new(Box::new(channel) as Box<dyn Channel>))
}

/// Opens an outbound TCP connection per `(remote, local)` pair, per
/// spec.md §4.8's "TCP: connect".
pub struct TcpChannelFactory;

impl ChannelFactory for TcpChannelFactory {
    fn open(&self, remote: &SocketAddress, _local: &SocketAddress) -> Result<SharedChannel, TransportError> {
        let addr = format!("{}:{}", remote.host(), remote.port());
        let stream = TcpStream::connect(addr)?;
        Ok(boxed(TcpChannel::from_stream(stream)?))
    }
}

/// Binds a local UDP socket and connects it to `remote`, per spec.md
/// §4.8's "UDP: bind" — connecting in addition to binding gives each
/// `(remote, local)` pair its own OS-filtered socket, matching how Hub
/// keys channels one-per-pair rather than one shared listening socket
/// fanning out to many peers.
pub struct UdpChannelFactory;

impl ChannelFactory for UdpChannelFactory {
    fn open(&self, remote: &SocketAddress, local: &SocketAddress) -> Result<SharedChannel, TransportError> {
        let mut channel = UdpChannel::bind(local.clone())?;
        channel.connect(remote.clone())?;
        Ok(boxed(channel))
    }
}

/// Owns `channels: AddressPair<Channel>` and `connections: AddressPair<Connection>`
/// and drives both from one `tick()` (spec.md §4.8).
pub struct Hub {
    factory: Arc<dyn ChannelFactory>,
    clock: Arc<dyn Clock>,
    channels: AddressPair<SharedChannel>,
    connections: AddressPair<Arc<Connection>>,
    recv_fresh: Duration,
    expires: Duration,
}

impl Hub {
    pub fn new(factory: Arc<dyn ChannelFactory>, clock: Arc<dyn Clock>, recv_fresh: Duration, expires: Duration) -> Self {
        Self {
            factory,
            clock,
            channels: AddressPair::new(),
            connections: AddressPair::new(),
            recv_fresh,
            expires,
        }
    }

    /// Looks up the Channel for `(remote, local)`; opens and caches one via
    /// the factory if absent (spec.md §4.8's `open`).
    pub fn open(&self, remote: &SocketAddress, local: &SocketAddress) -> Option<SharedChannel> {
        if let Some(channel) = self.channels.get(Some(remote), Some(local)) {
            return Some(channel);
        }
        self.reopen(remote, local)
    }

    fn reopen(&self, remote: &SocketAddress, local: &SocketAddress) -> Option<SharedChannel> {
        match self.factory.open(remote, local) {
            Ok(channel) => {
                self.channels.put(Some(remote.clone()), Some(local.clone()), channel.clone());
                Some(channel)
            }
            Err(err) => {
                warn!(target: "startrek::hub", %remote, %local, error = %err, "failed to open channel");
                None
            }
        }
    }

    /// Finds or creates the Connection for `(remote, local)` (spec.md
    /// §4.8's `connect`).
    pub fn connect(
        &self,
        remote: &SocketAddress,
        local: &SocketAddress,
        delegate: Arc<dyn ConnectionDelegate>,
        active: bool,
    ) -> Option<Arc<Connection>> {
        if let Some(conn) = self.connections.get(Some(remote), Some(local)) {
            return Some(conn);
        }
        let channel = self.open(remote, local)?;
        let conn = Arc::new(Connection::new(
            remote.clone(),
            local.clone(),
            Some(channel),
            delegate,
            self.clock.clone(),
            active,
        ));
        self.connections.put(Some(remote.clone()), Some(local.clone()), conn.clone());
        Some(conn)
    }

    /// Drains every Channel's available bytes into its owning Connection,
    /// advances every Connection's state machine, services
    /// `ActiveConnection` reconnects, then drops Error-state entries no
    /// longer referenced outside this Hub (spec.md §4.8).
    pub fn tick(&self) {
        let now = self.clock.now();
        let mut buf = [0u8; 65_536];

        for channel in self.channels.values() {
            loop {
                let read = {
                    let mut guard = channel.lock();
                    guard.receive(&mut buf)
                };
                match read {
                    Ok((ReadOutcome::Data(n), from)) => {
                        let (local, remote) = {
                            let guard = channel.lock();
                            (guard.local(), from.or_else(|| guard.remote()))
                        };
                        match (remote, local) {
                            (Some(remote), Some(local)) => {
                                if let Some(conn) = self.connections.get(Some(&remote), Some(&local)) {
                                    conn.on_received(&buf[..n]);
                                } else {
                                    trace!(target: "startrek::hub", %remote, %local, "no connection registered for inbound bytes");
                                }
                            }
                            _ => trace!(target: "startrek::hub", "inbound bytes with no resolvable address pair"),
                        }
                    }
                    Ok((ReadOutcome::WouldBlock, _)) | Ok((ReadOutcome::Eof, _)) => break,
                    Err(err) => {
                        warn!(target: "startrek::hub", error = %err, "channel read failed");
                        break;
                    }
                }
            }
        }

        for conn in self.connections.values() {
            conn.tick(now, self.recv_fresh, self.expires);
        }

        for conn in self.connections.values() {
            let dead = conn.channel().map(|c| !c.lock().is_alive()).unwrap_or(true);
            if conn.is_active() && dead {
                if let Some(fresh) = self.reopen(conn.remote(), conn.local()) {
                    conn.replace_channel(fresh);
                }
            }
        }

        self.channels
            .retain(|channel| channel.lock().is_alive() || Arc::strong_count(channel) > 1);
        self.connections
            .retain(|conn| conn.state() != ConnectionState::Error || Arc::strong_count(conn) > 1);
    }

    pub fn channel(&self, remote: &SocketAddress, local: &SocketAddress) -> Option<SharedChannel> {
        self.channels.get(Some(remote), Some(local))
    }

    pub fn connection(&self, remote: &SocketAddress, local: &SocketAddress) -> Option<Arc<Connection>> {
        self.connections.get(Some(remote), Some(local))
    }
}
