//! The `Ship` family: opaque envelopes crossing the Docker boundary.
//!
//! spec.md §9 keeps concrete ship formats out of the core and trades in
//! trait objects at the Docker boundary, mirroring
//! `spark_transport::connection`'s preference for a narrow trait over a
//! generic payload type where the concrete codec is a plugin concern.
//! `startrek-core` only defines the traits; a concrete "Plain" format lives
//! in the `startrek` crate's `docker` module to exercise these traits in
//! integration tests.

use std::time::Instant;

use bytes::Bytes;

/// The identifier a `Departure`'s fragments carry and an `Arrival`'s
/// assembled fragments share, used to correlate acks back to outstanding
/// sends. Concrete ship formats choose their own serial-number encoding;
/// the core only needs it to be cheaply cloned and compared.
pub type ShipId = Bytes;

/// Common surface shared by `Arrival` and `Departure`.
pub trait Ship: Send {
    /// The serial number correlating this ship to its acknowledgement.
    fn sn(&self) -> ShipId;

    /// Escape hatch for a concrete ship format to downcast a trait object
    /// back to its own type, e.g. when merging two fragments of the same
    /// wire format in `Arrival::assemble`.
    fn as_any(&self) -> &dyn std::any::Any;

    /// The instant this ship last made progress (received a fragment, or was
    /// sent/retried). `None` before the first such event.
    fn last_time(&self) -> Option<Instant>;
}

/// Lifecycle of an inbound, still-assembling message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArrivalStatus {
    /// Waiting on more fragments.
    Assembling,
    /// No fragment has arrived within the reassembly window; the Dock should
    /// drop this entry.
    Expired,
}

/// Result of folding one fragment into an in-progress [`Arrival`].
pub enum AssembleOutcome {
    /// Every fragment has arrived; carries the completed ship.
    Complete(Box<dyn Arrival>),
    /// More fragments are still expected; carries the updated accumulator to
    /// store back in the `ArrivalHall`.
    Pending(Box<dyn Arrival>),
}

/// An inbound message being reassembled from one or more fragments.
pub trait Arrival: Ship {
    /// True for a monolithic (single-fragment) arrival that needs no
    /// merging — the `ArrivalHall` returns it immediately on first sight
    /// instead of storing it to await further fragments.
    fn is_complete(&self) -> bool;

    /// Folds `other` (a newly-received fragment carrying the same `sn`) into
    /// `self`. `now` becomes the new `last_time` regardless of the outcome.
    fn assemble(self: Box<Self>, other: Box<dyn Arrival>, now: Instant) -> AssembleOutcome;

    /// Current assembly status, given the reassembly window `expires`.
    fn status(&self, now: Instant, expires: std::time::Duration) -> ArrivalStatus {
        match self.last_time() {
            None => ArrivalStatus::Assembling,
            Some(last) if now.saturating_duration_since(last) >= expires => ArrivalStatus::Expired,
            Some(_) => ArrivalStatus::Assembling,
        }
    }

    /// The payload, once fully assembled. Implementations that are always
    /// single-fragment may return `Some` immediately; multi-fragment
    /// implementations return `None` until `assemble` has completed them.
    fn payload(&self) -> Option<&[u8]>;
}

/// Lifecycle of an outbound message awaiting acknowledgement.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DepartureStatus {
    /// Never yet handed to a transport for sending.
    New,
    /// Sent at least once; within the retransmission window, so the
    /// DepartureHall should not resend yet.
    Waiting,
    /// Sent at least once; past the retransmission window with retries
    /// remaining, so the next `next_departure` poll should resend it.
    Timeout,
    /// Fully acknowledged; no fragments remain outstanding.
    Done,
    /// Retries exhausted without acknowledgement.
    Failed,
}

/// An outbound message, possibly split into fragments, tracked until every
/// fragment is acknowledged or retries are exhausted.
pub trait Departure: Ship {
    /// The wire-ready fragments still awaiting acknowledgement. Acknowledged
    /// fragments are removed by `ack`; assembly is complete once this is
    /// empty.
    fn fragments(&self) -> &[Bytes];

    /// Scheduling priority; lower values are serviced first by
    /// `DepartureHall::next_departure` (spec.md §4.4).
    fn priority(&self) -> i32;

    /// Remaining send attempts, initialized to `max_tries`. Reaches `0`
    /// after the `max_tries`-th `mark_sent` call, at which point the next
    /// check past `expires` reports `Failed`.
    fn tries_left(&self) -> u32;

    /// Disposable when `false`: once sent, never retried and never kept in
    /// the DepartureHall's SN index (spec.md §3).
    fn important(&self) -> bool;

    /// Called once per send attempt; decrements `tries_left` and refreshes
    /// `last_time` to `now`.
    fn mark_sent(&mut self, now: Instant);

    /// Called after a successful write of `fragments()[0]`; removes that
    /// fragment when `sent_len` covers its full length. A short write (a
    /// stream channel under backpressure) leaves it in place so the next
    /// tick resends the remainder from the start of the fragment.
    fn advance(&mut self, sent_len: usize);

    /// Consulted against an acknowledgement carrying this Departure's `sn`;
    /// clears every outstanding fragment and returns `true` once nothing
    /// remains unacknowledged. Whether to treat a response as acknowledging
    /// one fragment or the whole Departure is a concrete-format decision —
    /// this contract only requires "matches `sn`" and "returns true iff
    /// `fragments()` is now empty" (spec.md §4.5's `checkResponse`).
    fn ack(&mut self, sn: &ShipId) -> bool;

    /// Derives the current status from `tries_left`, `last_time`, and the
    /// outstanding fragment count, per spec.md §3's Departure state table.
    ///
    /// A Departure that has never been sent has `last_time == None`,
    /// reported as `New` unconditionally — `tries_left` only matters once
    /// `last_time` is `Some`. Every `mark_sent` call (the first included)
    /// decrements `tries_left`; once it reaches `0`, the next check past
    /// `expires` reports `Failed`, giving exactly `max_tries` total send
    /// attempts (matching `max_tries`'s own initial value — see
    /// [`tries_left`](Self::tries_left)).
    fn status(&self, now: Instant, expires: std::time::Duration, _max_tries: u32) -> DepartureStatus {
        if self.fragments().is_empty() {
            return DepartureStatus::Done;
        }
        match self.last_time() {
            None => DepartureStatus::New,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < expires {
                    DepartureStatus::Waiting
                } else if self.tries_left() > 0 {
                    DepartureStatus::Timeout
                } else {
                    DepartureStatus::Failed
                }
            }
        }
    }
}

/// Parses a raw fragment read off a `Channel` into either an `Arrival`
/// fragment or a protocol error. Concrete ship formats implement this to
/// plug their wire codec into the Docker pipeline.
pub trait ShipParser: Send {
    fn parse(&self, raw: &[u8]) -> Result<Box<dyn Arrival>, crate::error::TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeDeparture {
        sn: ShipId,
        fragments: Vec<Bytes>,
        tries_left: u32,
        last_time: Option<Instant>,
    }

    impl Ship for FakeDeparture {
        fn sn(&self) -> ShipId {
            self.sn.clone()
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn last_time(&self) -> Option<Instant> {
            self.last_time
        }
    }

    impl Departure for FakeDeparture {
        fn fragments(&self) -> &[Bytes] {
            &self.fragments
        }
        fn priority(&self) -> i32 {
            0
        }
        fn tries_left(&self) -> u32 {
            self.tries_left
        }
        fn important(&self) -> bool {
            true
        }
        fn mark_sent(&mut self, now: Instant) {
            self.tries_left = self.tries_left.saturating_sub(1);
            self.last_time = Some(now);
        }
        fn advance(&mut self, sent_len: usize) {
            if let Some(first) = self.fragments.first() {
                if sent_len >= first.len() {
                    self.fragments.remove(0);
                }
            }
        }
        fn ack(&mut self, sn: &ShipId) -> bool {
            if let Some(pos) = self.fragments.iter().position(|_| sn == &self.sn) {
                self.fragments.remove(pos);
                true
            } else {
                false
            }
        }
    }

    const MAX_TRIES: u32 = 3;
    const EXPIRES: Duration = Duration::from_secs(1);

    fn new_departure() -> FakeDeparture {
        FakeDeparture {
            sn: ShipId::from_static(b"sn-1"),
            fragments: vec![Bytes::from_static(b"payload")],
            tries_left: MAX_TRIES,
            last_time: None,
        }
    }

    #[test]
    fn never_sent_departure_is_new() {
        let d = new_departure();
        let now = Instant::now();
        assert_eq!(d.status(now, EXPIRES, MAX_TRIES), DepartureStatus::New);
    }

    #[test]
    fn exactly_max_tries_sends_before_failed() {
        let mut d = new_departure();
        let mut now = Instant::now();
        let mut successful_polls = 0;

        loop {
            let status = d.status(now, EXPIRES, MAX_TRIES);
            match status {
                DepartureStatus::New | DepartureStatus::Timeout => {
                    successful_polls += 1;
                    d.mark_sent(now);
                    now += EXPIRES + Duration::from_millis(1);
                }
                DepartureStatus::Failed => break,
                other => panic!("unexpected status {other:?}"),
            }
        }

        assert_eq!(successful_polls, MAX_TRIES);
    }

    #[test]
    fn ack_empties_fragments_and_status_becomes_done() {
        let mut d = new_departure();
        assert!(d.ack(&d.sn()));
        assert_eq!(
            d.status(Instant::now(), EXPIRES, MAX_TRIES),
            DepartureStatus::Done
        );
    }

    #[test]
    fn freshly_sent_departure_is_waiting_until_expires() {
        let mut d = new_departure();
        let now = Instant::now();
        d.mark_sent(now);
        assert_eq!(d.status(now, EXPIRES, MAX_TRIES), DepartureStatus::Waiting);
    }

    proptest::proptest! {
        /// For any `max_tries`, polling status/mark_sent past `expires` each
        /// time yields exactly `max_tries` successful sends before `Failed` —
        /// the property `exactly_max_tries_sends_before_failed` above checks
        /// for one fixed value.
        #[test]
        fn fuzzed_max_tries_yields_exactly_max_tries_sends(max_tries in 1u32..20) {
            let mut d = FakeDeparture {
                sn: ShipId::from_static(b"sn-fuzz"),
                fragments: vec![Bytes::from_static(b"payload")],
                tries_left: max_tries,
                last_time: None,
            };
            let mut now = Instant::now();
            let mut successful_polls = 0u32;

            loop {
                match d.status(now, EXPIRES, max_tries) {
                    DepartureStatus::New | DepartureStatus::Timeout => {
                        successful_polls += 1;
                        d.mark_sent(now);
                        now += EXPIRES + Duration::from_millis(1);
                    }
                    DepartureStatus::Failed => break,
                    other => panic!("unexpected status {other:?}"),
                }
            }

            proptest::prop_assert_eq!(successful_polls, max_tries);
        }
    }
}
