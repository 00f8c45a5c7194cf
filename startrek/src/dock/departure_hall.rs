//! Outbound retry queue, priority-ordered with a duplicate-send guard.
//!
//! Grounded on the same `parking_lot::Mutex`-guarded-map idiom as
//! [`super::arrival_hall::ArrivalHall`]; the priority FIFO is a sorted
//! `Vec<i32>` of active priorities each owning a `VecDeque`, mirroring
//! `spark_switch::core::session_manager`'s preference for a small explicit
//! structure over pulling in a priority-queue crate for a handful of
//! reserved priority values (spec.md §3: Urgent=-1, Normal=0, Slower=1).
//!
//! A Departure that is retried must be both handed back to the caller (to
//! actually resend its fragments) and re-appended to its FIFO tail so it is
//! polled again after `EXPIRES`. Both sides need the *same* object — a
//! Departure's `tries_left`/`last_time` mutate in place — so the Hall stores
//! `Arc<Mutex<Box<dyn Departure>>>` handles rather than owned boxes; the
//! returned handle and the requeued handle are the same `Arc`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use startrek_core::{Departure, DepartureStatus, ShipId};

/// A shared handle to an in-flight Departure.
pub type DepartureHandle = Arc<Mutex<Box<dyn Departure>>>;

struct Inner {
    priorities: Vec<i32>,
    fifos: HashMap<i32, VecDeque<DepartureHandle>>,
    by_sn: HashMap<ShipId, DepartureHandle>,
    timestamps: HashMap<ShipId, Instant>,
    done: HashMap<ShipId, Instant>,
    /// Departures `next_departure` just discovered had exhausted their
    /// retries, awaiting `take_failed` to hand them to the Docker layer for
    /// a one-time `onFailedToSend` (spec.md §8 scenario S3).
    failed: Vec<DepartureHandle>,
}

/// Tracks outbound Departures awaiting acknowledgement, retrying important
/// ones and suppressing duplicate responses via short-lived tombstones.
pub struct DepartureHall {
    inner: Mutex<Inner>,
}

impl DepartureHall {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                priorities: Vec::new(),
                fifos: HashMap::new(),
                by_sn: HashMap::new(),
                timestamps: HashMap::new(),
                done: HashMap::new(),
                failed: Vec::new(),
            }),
        }
    }

    /// Enqueues `outgo`. Returns `false` if `outgo.important()` and an
    /// un-done important Departure with the same SN is already tracked.
    pub fn add_departure(&self, outgo: Box<dyn Departure>, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let sn = outgo.sn();

        if outgo.important() && inner.by_sn.contains_key(&sn) {
            return false;
        }

        let priority = outgo.priority();
        let important = outgo.important();
        let handle: DepartureHandle = Arc::new(Mutex::new(outgo));

        if important {
            inner.by_sn.insert(sn.clone(), handle.clone());
            inner.timestamps.insert(sn, now);
        }

        if !inner.fifos.contains_key(&priority) {
            let pos = inner.priorities.partition_point(|p| *p < priority);
            inner.priorities.insert(pos, priority);
            inner.fifos.insert(priority, VecDeque::new());
        }
        inner.fifos.get_mut(&priority).unwrap().push_back(handle);
        true
    }

    /// Matches an inbound response (identified by `sn`) against outstanding
    /// Departures. Returns the completed Departure once fully acknowledged,
    /// `None` for a duplicate (tombstoned), an unsolicited response, or a
    /// still-partial acknowledgement.
    pub fn check_response(&self, sn: &ShipId, now: Instant) -> Option<DepartureHandle> {
        let mut inner = self.inner.lock();

        let handle = match inner.by_sn.get(sn) {
            Some(h) => h.clone(),
            None => {
                if inner.done.contains_key(sn) {
                    trace!(target: "startrek::dock", "duplicate response absorbed");
                }
                return None;
            }
        };

        let fully_acked = handle.lock().ack(sn);
        if !fully_acked {
            return None;
        }

        inner.by_sn.remove(sn);
        inner.timestamps.remove(sn);
        inner.done.insert(sn.clone(), now);
        Self::remove_from_fifo(&mut inner, sn);
        Some(handle)
    }

    fn remove_from_fifo(inner: &mut Inner, sn: &ShipId) {
        for fifo in inner.fifos.values_mut() {
            if let Some(pos) = fifo.iter().position(|h| h.lock().sn() == *sn) {
                fifo.remove(pos);
                break;
            }
        }
    }

    /// Returns the next Departure ready to (re)send, per spec.md §4.5's
    /// priority-ascending, FIFO-within-priority drain order.
    ///
    /// A `Waiting` head does not stop the scan: it is rotated to the back of
    /// its own FIFO so a `New`/`Timeout` Departure enqueued behind it at the
    /// same priority still drains this call, instead of being starved behind
    /// the head's `expires` window. `examined` bounds the rotation to one
    /// full lap per priority so an all-`Waiting` FIFO returns `None` rather
    /// than spinning.
    pub fn next_departure(
        &self,
        now: Instant,
        expires: Duration,
        max_tries: u32,
    ) -> Option<DepartureHandle> {
        let mut inner = self.inner.lock();
        let priorities = inner.priorities.clone();

        for priority in priorities {
            let fifo_len = inner.fifos.get(&priority).map(VecDeque::len).unwrap_or(0);
            let mut examined = 0usize;

            loop {
                let front_status = {
                    let fifo = inner.fifos.get(&priority)?;
                    match fifo.front() {
                        Some(h) => Some(h.lock().status(now, expires, max_tries)),
                        None => None,
                    }
                };
                let status = match front_status {
                    Some(s) => s,
                    None => break,
                };

                match status {
                    DepartureStatus::Done => {
                        let handle = inner.fifos.get_mut(&priority).unwrap().pop_front().unwrap();
                        let sn = handle.lock().sn();
                        inner.by_sn.remove(&sn);
                        inner.timestamps.remove(&sn);
                        continue;
                    }
                    DepartureStatus::Failed => {
                        let handle = inner.fifos.get_mut(&priority).unwrap().pop_front().unwrap();
                        let sn = handle.lock().sn();
                        inner.by_sn.remove(&sn);
                        inner.timestamps.remove(&sn);
                        inner.failed.push(handle);
                        continue;
                    }
                    DepartureStatus::Waiting => {
                        examined += 1;
                        if examined >= fifo_len {
                            break;
                        }
                        let handle = inner.fifos.get_mut(&priority).unwrap().pop_front().unwrap();
                        inner.fifos.get_mut(&priority).unwrap().push_back(handle);
                        continue;
                    }
                    DepartureStatus::New | DepartureStatus::Timeout => {
                        let handle = inner.fifos.get_mut(&priority).unwrap().pop_front().unwrap();
                        let important = handle.lock().important();
                        handle.lock().mark_sent(now);
                        if important {
                            inner
                                .fifos
                                .get_mut(&priority)
                                .unwrap()
                                .push_back(handle.clone());
                        }
                        return Some(handle);
                    }
                }
            }
        }
        None
    }

    /// Drops `done` tombstones older than `expires`. Failed departures are
    /// already removed by `next_departure`; this only ages out tombstones.
    pub fn purge(&self, now: Instant, expires: Duration) {
        let mut inner = self.inner.lock();
        let stale: Vec<ShipId> = inner
            .done
            .iter()
            .filter(|(_, t)| now.saturating_duration_since(**t) >= expires)
            .map(|(sn, _)| sn.clone())
            .collect();
        for sn in stale {
            inner.done.remove(&sn);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().fifos.values().map(|q| q.len()).sum()
    }

    /// Drains Departures that exhausted their retries since the last call,
    /// for the Docker layer to fire one `onFailedToSend` each (spec.md §8
    /// scenario S3: "then `status = Failed`, and `onFailedToSend` fires
    /// once").
    pub fn take_failed(&self) -> Vec<DepartureHandle> {
        std::mem::take(&mut self.inner.lock().failed)
    }

    pub fn is_tombstoned(&self, sn: &ShipId) -> bool {
        self.inner.lock().done.contains_key(sn)
    }
}

impl Default for DepartureHall {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::PlainDeparture;
    use bytes::Bytes;

    const EXPIRES: Duration = Duration::from_secs(1);

    fn departure(sn: &str, priority: i32, important: bool, max_tries: u32) -> Box<dyn Departure> {
        Box::new(PlainDeparture::new(
            Bytes::copy_from_slice(sn.as_bytes()),
            Bytes::from_static(b"x"),
            priority,
            important,
            max_tries,
        ))
    }

    /// Invariant 3: lower priority values drain before higher ones.
    #[test]
    fn priority_monotonicity() {
        let hall = DepartureHall::new();
        let now = Instant::now();
        hall.add_departure(departure("a", 1, false, 3), now);
        hall.add_departure(departure("b", 0, false, 3), now);

        let first = hall.next_departure(now, EXPIRES, 3).unwrap();
        assert_eq!(first.lock().sn(), Bytes::from_static(b"b"));
        let second = hall.next_departure(now, EXPIRES, 3).unwrap();
        assert_eq!(second.lock().sn(), Bytes::from_static(b"a"));
    }

    /// Invariant 4: equal-priority Departures drain in insertion order.
    #[test]
    fn fifo_within_equal_priority() {
        let hall = DepartureHall::new();
        let now = Instant::now();
        hall.add_departure(departure("first", 0, false, 3), now);
        hall.add_departure(departure("second", 0, false, 3), now);

        let first = hall.next_departure(now, EXPIRES, 3).unwrap();
        assert_eq!(first.lock().sn(), Bytes::from_static(b"first"));
        let second = hall.next_departure(now, EXPIRES, 3).unwrap();
        assert_eq!(second.lock().sn(), Bytes::from_static(b"second"));
    }

    /// Invariant 5: an important Departure that is never acknowledged is
    /// handed back exactly `max_tries` times, then reports `Failed`.
    #[test]
    fn important_departure_retries_exactly_max_tries() {
        let hall = DepartureHall::new();
        const MAX_TRIES: u32 = 3;
        let mut now = Instant::now();
        hall.add_departure(departure("sn-7", 0, true, MAX_TRIES), now);

        for _ in 0..MAX_TRIES {
            let handle = hall.next_departure(now, EXPIRES, MAX_TRIES).expect("retry available");
            assert_eq!(handle.lock().sn(), Bytes::from_static(b"sn-7"));
            now += EXPIRES + Duration::from_millis(1);
        }

        assert!(hall.next_departure(now, EXPIRES, MAX_TRIES).is_none());
    }

    /// Invariant 6: a non-important Departure is returned exactly once,
    /// regardless of how much time passes afterward.
    #[test]
    fn disposable_departure_sent_once() {
        let hall = DepartureHall::new();
        let now = Instant::now();
        hall.add_departure(departure("ping", -1, false, 3), now);

        assert!(hall.next_departure(now, EXPIRES, 3).is_some());
        let later = now + EXPIRES * 10;
        assert!(hall.next_departure(later, EXPIRES, 3).is_none());
    }

    /// A `Waiting` important Departure at the head of a priority FIFO must
    /// not block a fresh Departure enqueued behind it at the same priority:
    /// `next_departure` should rotate past the Waiting head rather than
    /// give up on the whole priority.
    #[test]
    fn waiting_head_does_not_starve_new_departure_behind_it() {
        let hall = DepartureHall::new();
        let now = Instant::now();

        hall.add_departure(departure("retry-me", 0, true, 3), now);
        let first = hall.next_departure(now, EXPIRES, 3).expect("initial send of retry-me");
        assert_eq!(first.lock().sn(), Bytes::from_static(b"retry-me"));

        // retry-me is now Waiting (just sent, within EXPIRES). A fresh
        // Departure queued behind it at the same priority must still drain.
        hall.add_departure(departure("fresh", 0, false, 3), now);
        let second = hall.next_departure(now, EXPIRES, 3).expect("fresh departure behind a Waiting head");
        assert_eq!(second.lock().sn(), Bytes::from_static(b"fresh"));

        // Nothing else is ready yet: retry-me is still Waiting and fresh was
        // disposable (sent once already).
        assert!(hall.next_departure(now, EXPIRES, 3).is_none());
    }

    /// Invariant 7: `add_departure` rejects a duplicate important SN while
    /// the original is still outstanding, but accepts a reused SN once the
    /// original has been acknowledged.
    #[test]
    fn duplicate_important_sn_rejected_until_acknowledged() {
        let hall = DepartureHall::new();
        let now = Instant::now();

        assert!(hall.add_departure(departure("sn-9", 0, true, 3), now));
        assert!(!hall.add_departure(departure("sn-9", 0, true, 3), now));

        let sn = Bytes::from_static(b"sn-9");
        hall.next_departure(now, EXPIRES, 3).expect("initial send");
        let completed = hall.check_response(&sn, now).expect("ack completes the departure");
        assert!(completed.lock().fragments().is_empty());

        assert!(hall.add_departure(departure("sn-9", 0, true, 3), now));
    }
}
