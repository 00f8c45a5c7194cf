//! Per-connection packet worker: the pipeline between Connection bytes and
//! application ships (spec.md §4.6).

pub mod plain;

pub use plain::{PlainArrival, PlainDeparture, PlainFactory, PlainParser};

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};

use startrek_core::{Arrival, Clock, Departure, ShipParser, TransportError};

use crate::connection::Connection;
use crate::dock::Dock;

/// Builds protocol-specific Departures the way a concrete ship format's
/// "Ship factory" would: wrapping an application payload, or constructing a
/// heartbeat PING (spec.md §4.6).
pub trait ShipFactory: Send + Sync {
    fn wrap(&self, payload: Bytes, priority: i32, important: bool) -> Box<dyn Departure>;
    fn heartbeat(&self) -> Box<dyn Departure>;
}

/// Docker status, a projection of its Connection's state (spec.md §4.7's
/// mapping table).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DockerStatus {
    Init,
    Preparing,
    Ready,
    Error,
}

/// Callbacks a Gate (or any Docker pool owner) implements to observe one
/// Docker's traffic (spec.md §6).
pub trait DockerDelegate: Send + Sync {
    fn on_arrival(&self, docker: &Docker, arrival: &dyn Arrival);
    fn on_sent(&self, docker: &Docker, departure: &dyn Departure);
    fn on_failed_to_send(&self, docker: &Docker, departure: &dyn Departure, error: &TransportError);
    fn on_sending(&self, docker: &Docker, departure: &dyn Departure, error: &TransportError);
    fn on_status_changed(&self, docker: &Docker, prev: DockerStatus, curr: DockerStatus);
}

/// The pipeline between one Connection's bytes and the application's ships.
/// Lives while its Connection lives — `connection` is a `Weak` reference so
/// a Docker never keeps a reclaimed Connection alive (spec.md §9's
/// back-reference note).
pub struct Docker {
    connection: Weak<Connection>,
    dock: Dock,
    /// `Weak` for the same reason `connection` is: the Gate owns both this
    /// Docker (strongly, by address pair) and implements `DockerDelegate`
    /// itself, so a strong reference here would be a cycle (spec.md §9's
    /// "cyclic delegate graph" note).
    delegate: Weak<dyn DockerDelegate>,
    parser: Arc<dyn ShipParser>,
    factory: Arc<dyn ShipFactory>,
    clock: Arc<dyn Clock>,
    last_outbound_time: Mutex<Option<Instant>>,
    status: Mutex<DockerStatus>,
    expires: Duration,
    reassembly_window: Duration,
    max_tries: u32,
}

impl Docker {
    pub fn new(
        connection: Weak<Connection>,
        parser: Arc<dyn ShipParser>,
        factory: Arc<dyn ShipFactory>,
        delegate: Weak<dyn DockerDelegate>,
        clock: Arc<dyn Clock>,
        expires: Duration,
        reassembly_window: Duration,
        max_tries: u32,
    ) -> Self {
        Self {
            connection,
            dock: Dock::new(),
            delegate,
            parser,
            factory,
            clock,
            last_outbound_time: Mutex::new(None),
            status: Mutex::new(DockerStatus::Init),
            expires,
            reassembly_window,
            max_tries,
        }
    }

    fn delegate(&self) -> Option<Arc<dyn DockerDelegate>> {
        self.delegate.upgrade()
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    pub fn status(&self) -> DockerStatus {
        *self.status.lock()
    }

    pub fn dock(&self) -> &Dock {
        &self.dock
    }

    /// Applies the Gate's `onStateChanged → onStatusChanged` mapping from
    /// spec.md §4.7.
    pub fn set_status(&self, status: DockerStatus) {
        let mut guard = self.status.lock();
        if *guard != status {
            let prev = *guard;
            *guard = status;
            drop(guard);
            if let Some(delegate) = self.delegate() {
                delegate.on_status_changed(self, prev, status);
            }
        }
    }

    /// Parses `data` into an Arrival, reassembles it, matches it against
    /// outstanding Departures, and fires the application delegate.
    pub fn process_received(&self, data: &[u8]) {
        let now = self.clock.now();
        let arrival = match self.parser.parse(data) {
            Ok(a) => a,
            Err(err) => {
                warn!(target: "startrek::docker", error = %err, "failed to parse inbound frame");
                return;
            }
        };

        let checked = match self
            .dock
            .assemble_arrival(arrival, now, self.reassembly_window)
        {
            Some(a) => a,
            None => return,
        };

        let delegate = match self.delegate() {
            Some(d) => d,
            None => return,
        };

        if let Some(departure) = self.dock.check_response(&checked.sn(), now) {
            let guard = departure.lock();
            delegate.on_sent(self, &**guard);
        }

        delegate.on_arrival(self, checked.as_ref());
    }

    /// Enqueues `ship` for sending. Returns `false` on a duplicate important
    /// SN (spec.md §4.5's `addDeparture`).
    pub fn send_ship(&self, ship: Box<dyn Departure>) -> bool {
        self.dock.add_departure(ship, self.clock.now())
    }

    /// Wraps `payload` as a Normal, important Departure and enqueues it.
    pub fn send(&self, payload: Bytes) -> bool {
        self.send_ship(self.factory.wrap(payload, 0, true))
    }

    /// Enqueues an Urgent, disposable keep-alive PING.
    pub fn heartbeat(&self) {
        self.send_ship(self.factory.heartbeat());
    }

    /// Drains ready Departures onto the Connection until the FIFO is empty
    /// or a send fails (spec.md §4.6).
    pub fn tick(&self) {
        let connection = match self.connection.upgrade() {
            Some(c) => c,
            None => return,
        };
        let now = self.clock.now();

        loop {
            let handle = match self.dock.next_departure(now, self.expires, self.max_tries) {
                Some(h) => h,
                None => break,
            };

            let fragment = handle.lock().fragments().first().cloned();
            let fragment = match fragment {
                Some(f) => f,
                None => continue,
            };

            let sent = connection.send(&fragment);
            if sent > 0 {
                handle.lock().advance(sent as usize);
                *self.last_outbound_time.lock() = Some(now);
                trace!(target: "startrek::docker", bytes = sent, "departure fragment sent");
            } else {
                let err = TransportError::closed("connection refused to send");
                if let Some(delegate) = self.delegate() {
                    let guard = handle.lock();
                    delegate.on_failed_to_send(self, &**guard, &err);
                }
                break;
            }
        }

        // Departures that exhausted their retries without ever failing to
        // write locally (e.g. sent fine over UDP but never acknowledged)
        // only surface here, not through the write-failure branch above
        // (spec.md §8 scenario S3).
        for handle in self.dock.take_failed_departures() {
            if let Some(delegate) = self.delegate() {
                let err = TransportError::timeout("departure retries exhausted");
                let guard = handle.lock();
                delegate.on_failed_to_send(self, &**guard, &err);
            }
        }
    }

    /// Drops stale Arrivals and expired Departure tombstones.
    pub fn purge(&self, now: Instant) {
        self.dock.purge(now, self.reassembly_window, self.expires);
    }

    pub fn last_outbound_time(&self) -> Option<Instant> {
        *self.last_outbound_time.lock()
    }
}
