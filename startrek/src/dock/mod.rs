//! Per-connection reassembly and retry store.

pub mod arrival_hall;
pub mod departure_hall;

pub use arrival_hall::ArrivalHall;
pub use departure_hall::{DepartureHall, DepartureHandle};

use std::time::{Duration, Instant};

use startrek_core::{Arrival, Departure, ShipId};

/// Owns one `ArrivalHall` and one `DepartureHall`. Every operation is
/// already internally synchronized (each Hall guards its own state with a
/// `parking_lot::Mutex`), so `Dock` itself needs no additional lock — this
/// plays the role spec.md §9 assigns to `LockedDock`, with the lock scope
/// chosen per-Hall rather than per-Dock (Open Question, resolved in
/// DESIGN.md).
pub struct Dock {
    arrivals: ArrivalHall,
    departures: DepartureHall,
}

impl Dock {
    pub fn new() -> Self {
        Self::with_capacity(arrival_hall::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(arrival_capacity: usize) -> Self {
        Self {
            arrivals: ArrivalHall::with_capacity(arrival_capacity),
            departures: DepartureHall::new(),
        }
    }

    pub fn assemble_arrival(
        &self,
        income: Box<dyn Arrival>,
        now: Instant,
        reassembly_window: Duration,
    ) -> Option<Box<dyn Arrival>> {
        self.arrivals.assemble_arrival(income, now, reassembly_window)
    }

    pub fn add_departure(&self, outgo: Box<dyn Departure>, now: Instant) -> bool {
        self.departures.add_departure(outgo, now)
    }

    pub fn check_response(&self, sn: &ShipId, now: Instant) -> Option<DepartureHandle> {
        self.departures.check_response(sn, now)
    }

    pub fn next_departure(
        &self,
        now: Instant,
        expires: Duration,
        max_tries: u32,
    ) -> Option<DepartureHandle> {
        self.departures.next_departure(now, expires, max_tries)
    }

    /// Drains Departures that just exhausted their retries (spec.md §8 S3).
    pub fn take_failed_departures(&self) -> Vec<DepartureHandle> {
        self.departures.take_failed()
    }

    /// Drops arrivals older than `reassembly_window` and expires departure
    /// tombstones older than `expires`.
    pub fn purge(&self, now: Instant, reassembly_window: Duration, expires: Duration) {
        self.arrivals.purge(now, reassembly_window);
        self.departures.purge(now, expires);
    }

    pub fn arrival_hall(&self) -> &ArrivalHall {
        &self.arrivals
    }

    pub fn departure_hall(&self) -> &DepartureHall {
        &self.departures
    }
}

impl Default for Dock {
    fn default() -> Self {
        Self::new()
    }
}
