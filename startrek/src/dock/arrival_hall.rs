//! Inbound fragment reassembly store.
//!
//! Grounded on `spark_switch::core::session_manager::SessionManager`'s
//! SN-keyed registry idiom, adapted from `DashMap` to a `parking_lot::Mutex`
//! guarding a plain `HashMap`: the Hall's `purge` needs to scan every entry's
//! age under one lock, which a sharded map would only complicate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use startrek_core::{Arrival, ArrivalStatus, AssembleOutcome, ShipId};

/// Bounds the number of in-flight SNs the Hall will track at once, per
/// spec.md §9's recommendation to cap unbounded SN space and evict oldest.
pub const DEFAULT_CAPACITY: usize = 1024;

struct Entry {
    arrival: Box<dyn Arrival>,
    first_seen: Instant,
}

struct Inner {
    entries: HashMap<ShipId, Entry>,
    /// Insertion order, oldest first, used to evict when `capacity` is hit.
    order: Vec<ShipId>,
    capacity: usize,
}

/// Stores in-progress `Arrival` reassembly, keyed by SN.
pub struct ArrivalHall {
    inner: Mutex<Inner>,
}

impl ArrivalHall {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                capacity,
            }),
        }
    }

    /// Folds `income` into whatever partial state is stored for its SN, per
    /// spec.md §4.5. Returns the completed arrival once every fragment has
    /// arrived, or `None` while assembly is still pending.
    pub fn assemble_arrival(
        &self,
        income: Box<dyn Arrival>,
        now: Instant,
        reassembly_window: Duration,
    ) -> Option<Box<dyn Arrival>> {
        if income.status(now, reassembly_window) == ArrivalStatus::Expired {
            trace!(target: "startrek::dock", "dropping expired income fragment");
            return None;
        }

        let sn = income.sn();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&sn) {
            if income.is_complete() {
                return Some(income);
            }
            self.evict_if_full(&mut inner);
            inner.order.push(sn.clone());
            inner.entries.insert(
                sn,
                Entry {
                    arrival: income,
                    first_seen: now,
                },
            );
            return None;
        }

        let Entry {
            arrival: stored,
            first_seen,
        } = inner.entries.remove(&sn).expect("just checked contains_key");
        match stored.assemble(income, now) {
            AssembleOutcome::Complete(done) => {
                inner.order.retain(|s| s != &sn);
                Some(done)
            }
            AssembleOutcome::Pending(partial) => {
                inner.entries.insert(
                    sn,
                    Entry {
                        arrival: partial,
                        first_seen,
                    },
                );
                None
            }
        }
    }

    fn evict_if_full(&self, inner: &mut Inner) {
        while inner.entries.len() >= inner.capacity {
            if let Some(oldest) = inner.order.first().cloned() {
                inner.order.remove(0);
                inner.entries.remove(&oldest);
                trace!(target: "startrek::dock", "evicted oldest in-flight arrival for capacity");
            } else {
                break;
            }
        }
    }

    /// Drops any Arrival whose first-seen timestamp is older than the
    /// reassembly window.
    pub fn purge(&self, now: Instant, reassembly_window: Duration) {
        let mut inner = self.inner.lock();
        let stale: Vec<ShipId> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.first_seen) >= reassembly_window)
            .map(|(sn, _)| sn.clone())
            .collect();
        for sn in stale {
            inner.entries.remove(&sn);
            inner.order.retain(|s| s != &sn);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Default for ArrivalHall {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::PlainArrival;
    use bytes::Bytes;

    fn fragment(sn: &str, idx: u16, total: u16, payload: &str) -> Box<dyn Arrival> {
        Box::new(PlainArrival::single_fragment(
            Bytes::copy_from_slice(sn.as_bytes()),
            idx,
            total,
            Bytes::copy_from_slice(payload.as_bytes()),
        ))
    }

    const WINDOW: Duration = Duration::from_secs(300);

    /// Invariant 1: every permutation of one message's fragments assembles
    /// to exactly one completed Arrival with the same payload.
    #[test]
    fn reassembly_is_permutation_independent() {
        let permutations = [
            [(0, "a"), (1, "b"), (2, "c")],
            [(2, "c"), (0, "a"), (1, "b")],
            [(1, "b"), (2, "c"), (0, "a")],
        ];

        for perm in permutations {
            let hall = ArrivalHall::new();
            let now = Instant::now();
            let mut completed = None;
            for (idx, payload) in perm {
                let outcome = hall.assemble_arrival(fragment("sn-perm", idx, 3, payload), now, WINDOW);
                if let Some(done) = outcome {
                    completed = Some(done);
                }
            }
            let done = completed.expect("all three fragments delivered");
            assert_eq!(done.payload().unwrap(), b"abc");
            assert!(hall.is_empty());
        }
    }

    /// Invariant 2: once a multi-fragment message completes, re-delivering
    /// one of its fragments never yields the already-completed Arrival
    /// again — it starts (at most) a fresh, still-pending reassembly.
    #[test]
    fn no_double_completion_after_reassembly() {
        let hall = ArrivalHall::new();
        let now = Instant::now();

        assert!(hall.assemble_arrival(fragment("sn-dup", 0, 2, "a"), now, WINDOW).is_none());
        let done = hall
            .assemble_arrival(fragment("sn-dup", 1, 2, "b"), now, WINDOW)
            .expect("second fragment completes the message");
        assert_eq!(done.payload().unwrap(), b"ab");
        assert!(hall.is_empty());

        // Redelivering fragment 0 after completion yields nothing: the
        // entry was removed on completion, so this starts a fresh, still
        // pending, single-fragment accumulation rather than resurrecting
        // the finished Arrival.
        let replay = hall.assemble_arrival(fragment("sn-dup", 0, 2, "a"), now, WINDOW);
        assert!(replay.is_none());
    }

    #[test]
    fn capacity_evicts_oldest_in_flight_entry() {
        let hall = ArrivalHall::with_capacity(2);
        let now = Instant::now();

        hall.assemble_arrival(fragment("sn-a", 0, 2, "a"), now, WINDOW);
        hall.assemble_arrival(fragment("sn-b", 0, 2, "b"), now, WINDOW);
        assert_eq!(hall.len(), 2);

        hall.assemble_arrival(fragment("sn-c", 0, 2, "c"), now, WINDOW);
        assert_eq!(hall.len(), 2);

        // sn-a was evicted: its second fragment now starts a fresh entry
        // rather than completing the original one.
        assert!(hall.assemble_arrival(fragment("sn-a", 1, 2, "a2"), now, WINDOW).is_none());
    }
}
