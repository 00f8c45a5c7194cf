//! Docker pool entry point. Gate is the public send/receive surface: it
//! owns Dockers keyed by address pair, runs the advance-party cache for
//! protocol detection on a fresh Connection, and forwards Docker events to
//! an application-supplied `DockerDelegate` (spec.md §4.7).
//!
//! Gate plays two roles — it is itself a `ConnectionDelegate` (attached to
//! every Connection the Hub hands it) and a `DockerDelegate` (attached to
//! every Docker it creates). Modeling these as two distinct traits avoids
//! the reference cycle a single combined interface would need: `Docker`
//! only ever sees Gate through a `Weak<dyn DockerDelegate>` (spec.md §9's
//! "cyclic delegate graph" note).

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};

use startrek_core::{AddressPair, Clock, Departure, ShipParser, SocketAddress, TransportError};

use crate::config::GateConfig;
use crate::connection::{Connection, ConnectionDelegate, ConnectionState};
use crate::docker::{Docker, DockerDelegate, DockerStatus, ShipFactory};

type AddressKey = (SocketAddress, SocketAddress);

/// Maps a Connection's state to the Docker-status projection, per the
/// table in spec.md §4.7's `onStateChanged` entry.
fn map_connection_state(state: ConnectionState) -> DockerStatus {
    match state {
        ConnectionState::Ready => DockerStatus::Ready,
        ConnectionState::Preparing => DockerStatus::Preparing,
        ConnectionState::Expired | ConnectionState::Maintaining => DockerStatus::Ready,
        ConnectionState::Error => DockerStatus::Error,
        ConnectionState::Default => DockerStatus::Init,
    }
}

/// A Docker pool and its advance-party cache, bound to one wire format.
///
/// A Gate serves exactly one `ShipParser`/`ShipFactory` pair — the
/// multi-protocol sniffing scenario the advance-party cache was built for
/// (spec.md §4.7) still applies to "bytes arrived before this Connection's
/// Docker existed yet", which happens whenever a Connection's first
/// `onReceived` fires before the first successful parse.
pub struct Gate {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    parser: Arc<dyn ShipParser>,
    factory: Arc<dyn ShipFactory>,
    /// A Connection registry mirroring the Hub's, populated by
    /// `register_connection` right after the Hub hands out a new
    /// Connection. Gate needs a strong `Arc<Connection>` here (not just
    /// the `&Connection` its `ConnectionDelegate` callbacks receive) to
    /// mint the `Weak<Connection>` each new Docker stores.
    connections: AddressPair<Arc<Connection>>,
    dockers: AddressPair<Arc<Docker>>,
    advance_party: Mutex<HashMap<AddressKey, Vec<Bytes>>>,
    /// The application's own observer; every `DockerDelegate` callback a
    /// Docker fires on Gate is forwarded here unchanged.
    app_delegate: Arc<dyn DockerDelegate>,
    /// A weak handle back to the `Arc<Gate>` this value lives behind, set
    /// once in `new`. Lets `&self` methods hand a `Weak<dyn DockerDelegate>`
    /// to a freshly built Docker without requiring callers (notably the
    /// `ConnectionDelegate::on_received` trait method, which only ever
    /// receives `&self`) to carry an `Arc<Self>` around.
    self_weak: Mutex<Weak<Gate>>,
    last_heartbeat_tick: Mutex<Option<Instant>>,
    last_purge_tick: Mutex<Option<Instant>>,
}

impl Gate {
    pub fn new(
        config: GateConfig,
        clock: Arc<dyn Clock>,
        parser: Arc<dyn ShipParser>,
        factory: Arc<dyn ShipFactory>,
        app_delegate: Arc<dyn DockerDelegate>,
    ) -> Arc<Self> {
        let gate = Arc::new(Self {
            config,
            clock,
            parser,
            factory,
            connections: AddressPair::new(),
            dockers: AddressPair::new(),
            advance_party: Mutex::new(HashMap::new()),
            app_delegate,
            self_weak: Mutex::new(Weak::new()),
            last_heartbeat_tick: Mutex::new(None),
            last_purge_tick: Mutex::new(None),
        });
        *gate.self_weak.lock() = Arc::downgrade(&gate);
        gate
    }

    /// A `Arc<dyn ConnectionDelegate>` view of `self`, handed to the Hub
    /// for every Connection it creates.
    pub fn as_connection_delegate(self: &Arc<Self>) -> Arc<dyn ConnectionDelegate> {
        self.clone() as Arc<dyn ConnectionDelegate>
    }

    fn as_docker_delegate(&self) -> Weak<dyn DockerDelegate> {
        self.self_weak.lock().clone()
    }

    /// Registers a Connection the Hub just created, so `on_received` can
    /// later mint a `Weak<Connection>` for a Docker built on top of it.
    /// Called once per Connection, right after `Hub::connect` returns it.
    pub fn register_connection(&self, remote: SocketAddress, local: SocketAddress, conn: Arc<Connection>) {
        self.connections.put(Some(remote), Some(local), conn);
    }

    /// Registers a Connection and eagerly creates its Docker, for the side
    /// that initiates a session locally — `send`/`sendShip` fail until a
    /// Docker exists, and the advance-party path only creates one once
    /// bytes have already arrived (spec.md §4.7), which never happens for
    /// a connection that only ever sends. Find-or-create, mirroring
    /// `Hub::connect`'s own idempotent pattern.
    pub fn attach(&self, remote: SocketAddress, local: SocketAddress, conn: Arc<Connection>) -> Arc<Docker> {
        self.connections.put(Some(remote.clone()), Some(local.clone()), conn.clone());
        if let Some(docker) = self.docker_for(&remote, &local) {
            return docker;
        }
        let docker = self.create_docker(&conn);
        self.dockers.put(Some(remote), Some(local), docker.clone());
        docker
    }

    fn key(remote: &SocketAddress, local: &SocketAddress) -> AddressKey {
        (remote.clone(), local.clone())
    }

    fn docker_for(&self, remote: &SocketAddress, local: &SocketAddress) -> Option<Arc<Docker>> {
        self.dockers.get(Some(remote), Some(local))
    }

    fn create_docker(&self, connection: &Arc<Connection>) -> Arc<Docker> {
        Arc::new(Docker::new(
            Arc::downgrade(connection),
            self.parser.clone(),
            self.factory.clone(),
            self.as_docker_delegate(),
            self.clock.clone(),
            self.config.expires(),
            self.config.reassembly_window(),
            self.config.max_tries(),
        ))
    }

    /// Wraps `payload` as a Normal, important Departure and routes it to
    /// the Docker registered for `(remote, local)` (spec.md §4.7's `send`).
    pub fn send(&self, payload: Bytes, remote: &SocketAddress, local: &SocketAddress) -> bool {
        match self.docker_for(remote, local) {
            Some(docker) => docker.send(payload),
            None => false,
        }
    }

    /// Routes a pre-built Departure to the Docker registered for
    /// `(remote, local)` (spec.md §4.7's `sendShip`).
    pub fn send_ship(&self, outgo: Box<dyn Departure>, remote: &SocketAddress, local: &SocketAddress) -> bool {
        match self.docker_for(remote, local) {
            Some(docker) => docker.send_ship(outgo),
            None => false,
        }
    }

    /// Runs every Docker's `tick`, then heartbeats stale Connections and
    /// purges expired state at their configured intervals (spec.md §4.7).
    pub fn tick(&self) {
        let now = self.clock.now();

        for docker in self.dockers.values() {
            docker.tick();
        }

        let due_heartbeat = {
            let mut last = self.last_heartbeat_tick.lock();
            let due = last
                .map(|t| now.saturating_duration_since(t) >= self.config.heartbeat_interval())
                .unwrap_or(true);
            if due {
                *last = Some(now);
            }
            due
        };
        if due_heartbeat {
            for docker in self.dockers.values() {
                if let Some(conn) = docker.connection() {
                    let state = conn.state();
                    if matches!(state, ConnectionState::Expired | ConnectionState::Maintaining) {
                        docker.heartbeat();
                    }
                }
            }
        }

        let due_purge = {
            let mut last = self.last_purge_tick.lock();
            let due = last
                .map(|t| now.saturating_duration_since(t) >= self.config.purge_interval())
                .unwrap_or(true);
            if due {
                *last = Some(now);
            }
            due
        };
        if due_purge {
            for docker in self.dockers.values() {
                docker.purge(now);
            }
            self.dockers.retain(|docker| docker.connection().is_some());
            self.connections.retain(|conn| Arc::strong_count(conn) > 1);
        }
    }
}

impl ConnectionDelegate for Gate {
    fn on_state_changed(&self, conn: &Connection, _prev: ConnectionState, curr: ConnectionState) {
        if let Some(docker) = self.docker_for(conn.remote(), conn.local()) {
            docker.set_status(map_connection_state(curr));
        }
    }

    /// Looks up the Docker for this Connection's address pair; if none
    /// exists yet, tries to detect the protocol by parsing `data` directly.
    /// A successful parse creates the Docker and replays any buffered
    /// advance-party bytes before `data` itself; a failed parse buffers
    /// `data` (capped at `advance_party_cap`) for the eventual Docker to
    /// consume once detection succeeds (spec.md §4.7).
    fn on_received(&self, conn: &Connection, data: &[u8]) {
        let remote = conn.remote();
        let local = conn.local();

        if let Some(docker) = self.docker_for(remote, local) {
            docker.process_received(data);
            return;
        }

        match self.parser.parse(data) {
            Ok(_) => {
                let Some(connection) = self.connections.get(Some(remote), Some(local)) else {
                    warn!(target: "startrek::gate", %remote, "protocol detected but no registered Connection; dropping frame");
                    return;
                };
                let docker = self.create_docker(&connection);
                self.dockers.put(Some(remote.clone()), Some(local.clone()), docker.clone());

                let buffered = {
                    let mut ap = self.advance_party.lock();
                    ap.remove(&Self::key(remote, local)).unwrap_or_default()
                };
                for buf in buffered {
                    docker.process_received(&buf);
                }
                docker.process_received(data);
            }
            Err(_) => {
                let mut ap = self.advance_party.lock();
                let entry = ap.entry(Self::key(remote, local)).or_default();
                if entry.len() < self.config.advance_party_cap() {
                    entry.push(Bytes::copy_from_slice(data));
                } else {
                    trace!(target: "startrek::gate", "advance-party cache full, dropping undetected frame");
                }
            }
        }
    }

    fn on_sent(&self, _conn: &Connection, _data: &[u8], _length: usize) {}

    fn on_failed_to_send(&self, conn: &Connection, _data: &[u8], error: &TransportError) {
        warn!(target: "startrek::gate", remote = %conn.remote(), error = %error, "connection failed to send");
    }

    fn on_error(&self, conn: &Connection, error: &TransportError) {
        warn!(target: "startrek::gate", remote = %conn.remote(), error = %error, "connection error");
        if let Some(docker) = self.docker_for(conn.remote(), conn.local()) {
            docker.set_status(DockerStatus::Error);
        }
    }
}

impl DockerDelegate for Gate {
    fn on_arrival(&self, docker: &Docker, arrival: &dyn startrek_core::Arrival) {
        self.app_delegate.on_arrival(docker, arrival);
    }

    fn on_sent(&self, docker: &Docker, departure: &dyn Departure) {
        self.app_delegate.on_sent(docker, departure);
    }

    fn on_failed_to_send(&self, docker: &Docker, departure: &dyn Departure, error: &TransportError) {
        self.app_delegate.on_failed_to_send(docker, departure, error);
    }

    fn on_sending(&self, docker: &Docker, departure: &dyn Departure, error: &TransportError) {
        self.app_delegate.on_sending(docker, departure, error);
    }

    fn on_status_changed(&self, docker: &Docker, prev: DockerStatus, curr: DockerStatus) {
        self.app_delegate.on_status_changed(docker, prev, curr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_state_mapping_matches_spec_table() {
        assert_eq!(map_connection_state(ConnectionState::Ready), DockerStatus::Ready);
        assert_eq!(map_connection_state(ConnectionState::Preparing), DockerStatus::Preparing);
        assert_eq!(map_connection_state(ConnectionState::Expired), DockerStatus::Ready);
        assert_eq!(map_connection_state(ConnectionState::Maintaining), DockerStatus::Ready);
        assert_eq!(map_connection_state(ConnectionState::Error), DockerStatus::Error);
        assert_eq!(map_connection_state(ConnectionState::Default), DockerStatus::Init);
    }
}
