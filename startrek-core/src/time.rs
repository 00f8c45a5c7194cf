//! A pluggable monotonic clock.
//!
//! Grounded on `spark_core::platform::time::clock::{Clock, MockClock}`,
//! trimmed to a synchronous `now()`-only contract: the core's scheduling
//! model (spec.md §5) is a polled tick loop driven from one thread, not an
//! async runtime, so there is no `sleep()`/waker machinery to carry over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of monotonic instants. Every timed invariant in the transport
/// layer (tombstone expiry, retransmission backoff, heartbeat cadence) reads
/// time through this trait instead of calling `Instant::now()` directly, so
/// tests can advance time deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The production clock: a thin wrapper over `std::time::Instant::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when told to. `base` is fixed at construction
/// and `offset_millis` is added on every `now()` call, so cloned handles of
/// the same `MockClock` observe each other's advances.
#[derive(Clone)]
pub struct MockClock {
    base: Instant,
    offset_millis: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Moves the clock forward by `delta`. Never moves it backward; transport
    /// invariants never require rewinding time.
    pub fn advance(&self, delta: Duration) {
        self.offset_millis
            .fetch_add(delta.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_only_moves_on_advance() {
        let clock = MockClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), t0 + Duration::from_secs(5));
    }

    #[test]
    fn cloned_mock_clock_shares_offset() {
        let clock = MockClock::new();
        let clone = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), clone.now());
    }
}
