//! The six-state Connection state machine.
//!
//! Centralizes the transition table from spec.md §4.3 into one `evaluate`
//! function per state, driven from a [`ConnectionSnapshot`] taken fresh each
//! tick rather than from direct field access — this keeps the table itself
//! free of locking concerns, mirroring how `spark_transport::connection`
//! keeps its backpressure classification a pure function over a metrics
//! snapshot.

use std::time::{Duration, Instant};

/// The six Connection states from spec.md §4.3.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConnectionState {
    Default,
    Preparing,
    Ready,
    Maintaining,
    Expired,
    Error,
}

/// The signals `evaluate` needs, taken once per tick so the transition table
/// reads as a pure function of "what do we know right now".
#[derive(Clone, Copy, Debug)]
pub struct ConnectionSnapshot {
    pub channel_present: bool,
    pub channel_alive: bool,
    pub last_received: Option<Instant>,
    pub last_sent: Option<Instant>,
    /// Bumped every time the Connection's channel is replaced; lets `Error`
    /// detect "channel is replaced with a fresh one" without the state
    /// machine reaching into Connection internals.
    pub channel_generation: u64,
}

/// Tracks the current state, when it was entered, and the channel
/// generation last observed (used to detect `Error → Default`).
#[derive(Debug)]
pub struct StateMachine {
    current: ConnectionState,
    enter_time: Instant,
    generation_at_enter: u64,
}

impl StateMachine {
    pub fn new(now: Instant) -> Self {
        Self {
            current: ConnectionState::Default,
            enter_time: now,
            generation_at_enter: 0,
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.current
    }

    pub fn enter_time(&self) -> Instant {
        self.enter_time
    }

    /// Evaluates the transition table against `snapshot`; if a transition
    /// fires, updates `current`/`enter_time` and returns
    /// `Some((prev, next))` for the caller to dispatch
    /// `delegate.on_state_changed`.
    pub fn tick(
        &mut self,
        now: Instant,
        snapshot: ConnectionSnapshot,
        recv_fresh: Duration,
        expires: Duration,
    ) -> Option<(ConnectionState, ConnectionState)> {
        let next = evaluate(self.current, now, self.enter_time, self.generation_at_enter, snapshot, recv_fresh, expires);
        match next {
            Some(next) if next != self.current => {
                let prev = self.current;
                self.current = next;
                self.enter_time = now;
                self.generation_at_enter = snapshot.channel_generation;
                Some((prev, next))
            }
            _ => None,
        }
    }
}

fn evaluate(
    current: ConnectionState,
    now: Instant,
    enter_time: Instant,
    generation_at_enter: u64,
    snap: ConnectionSnapshot,
    recv_fresh: Duration,
    expires: Duration,
) -> Option<ConnectionState> {
    use ConnectionState::*;

    match current {
        Default => {
            if snap.channel_present {
                Some(Preparing)
            } else {
                None
            }
        }
        Preparing => {
            if !snap.channel_present {
                Some(Default)
            } else if snap.channel_alive && snap.last_received.is_some() {
                Some(Ready)
            } else if !snap.channel_alive {
                Some(Default)
            } else {
                None
            }
        }
        Ready => {
            if !snap.channel_alive {
                Some(Error)
            } else {
                match snap.last_received {
                    Some(r) if now.saturating_duration_since(r) < recv_fresh => None,
                    _ => Some(Expired),
                }
            }
        }
        Expired => {
            if !snap.channel_alive {
                Some(Error)
            } else if snap.last_sent.map(|s| s >= enter_time).unwrap_or(false) {
                Some(Maintaining)
            } else {
                None
            }
        }
        Maintaining => {
            if !snap.channel_alive {
                Some(Error)
            } else if snap.last_received.map(|r| r >= enter_time).unwrap_or(false) {
                Some(Ready)
            } else {
                let since_sent = snap
                    .last_sent
                    .map(|s| now.saturating_duration_since(s))
                    .unwrap_or(Duration::MAX);
                if since_sent >= expires {
                    Some(Expired)
                } else {
                    None
                }
            }
        }
        Error => {
            if snap.channel_present && snap.channel_generation != generation_at_enter {
                Some(Default)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(present: bool, alive: bool, recv: Option<Instant>, sent: Option<Instant>) -> ConnectionSnapshot {
        ConnectionSnapshot {
            channel_present: present,
            channel_alive: alive,
            last_received: recv,
            last_sent: sent,
            channel_generation: 0,
        }
    }

    const RECV_FRESH: Duration = Duration::from_secs(32);
    const EXPIRES: Duration = Duration::from_secs(16);

    #[test]
    fn full_roundtrip_fires_five_transitions() {
        let t0 = Instant::now();
        let mut sm = StateMachine::new(t0);
        let mut events = Vec::new();

        // Default -> Preparing
        let t1 = t0 + Duration::from_millis(1);
        if let Some(e) = sm.tick(t1, snap(true, false, None, None), RECV_FRESH, EXPIRES) {
            events.push(e);
        }
        assert_eq!(sm.current(), ConnectionState::Preparing);

        // Preparing -> Ready (alive + first byte)
        let t2 = t1 + Duration::from_millis(1);
        if let Some(e) = sm.tick(t2, snap(true, true, Some(t2), None), RECV_FRESH, EXPIRES) {
            events.push(e);
        }
        assert_eq!(sm.current(), ConnectionState::Ready);

        // Ready -> Expired (stale receive)
        let t3 = t2 + RECV_FRESH + Duration::from_millis(1);
        if let Some(e) = sm.tick(t3, snap(true, true, Some(t2), None), RECV_FRESH, EXPIRES) {
            events.push(e);
        }
        assert_eq!(sm.current(), ConnectionState::Expired);

        // Expired -> Maintaining (heartbeat sent)
        let t4 = t3 + Duration::from_millis(1);
        if let Some(e) = sm.tick(t4, snap(true, true, Some(t2), Some(t4)), RECV_FRESH, EXPIRES) {
            events.push(e);
        }
        assert_eq!(sm.current(), ConnectionState::Maintaining);

        // Maintaining -> Ready (response arrives after send)
        let t5 = t4 + Duration::from_millis(1);
        if let Some(e) = sm.tick(t5, snap(true, true, Some(t5), Some(t4)), RECV_FRESH, EXPIRES) {
            events.push(e);
        }
        assert_eq!(sm.current(), ConnectionState::Ready);

        assert_eq!(events.len(), 5);
        let expected = [
            (ConnectionState::Default, ConnectionState::Preparing),
            (ConnectionState::Preparing, ConnectionState::Ready),
            (ConnectionState::Ready, ConnectionState::Expired),
            (ConnectionState::Expired, ConnectionState::Maintaining),
            (ConnectionState::Maintaining, ConnectionState::Ready),
        ];
        assert_eq!(events, expected);
    }

    #[test]
    fn dead_channel_goes_to_error_from_any_live_state() {
        let t0 = Instant::now();
        let mut sm = StateMachine::new(t0);
        sm.tick(t0, snap(true, true, Some(t0), None), RECV_FRESH, EXPIRES);
        let t1 = t0 + Duration::from_millis(1);
        sm.tick(t1, snap(true, true, Some(t1), None), RECV_FRESH, EXPIRES);
        assert_eq!(sm.current(), ConnectionState::Ready);

        let t2 = t1 + Duration::from_millis(1);
        let (prev, next) = sm
            .tick(t2, snap(true, false, Some(t1), None), RECV_FRESH, EXPIRES)
            .unwrap();
        assert_eq!((prev, next), (ConnectionState::Ready, ConnectionState::Error));
    }

    proptest::proptest! {
        /// `evaluate`'s `Error` arm only ever returns `Some(Default)` or
        /// `None` — once in `Error`, no snapshot can jump straight to a live
        /// state; a fresh channel generation is required first, matching
        /// `spark_transport::connection`'s own "Error only clears on a new
        /// channel" invariant.
        #[test]
        fn error_state_only_ever_moves_to_default_or_stays_error(
            channel_present in proptest::prelude::any::<bool>(),
            channel_alive in proptest::prelude::any::<bool>(),
            generation in 0u64..4,
        ) {
            let t0 = Instant::now();
            let mut sm = StateMachine::new(t0);

            let t1 = t0 + Duration::from_millis(1);
            sm.tick(t1, snap(true, false, None, None), RECV_FRESH, EXPIRES);
            let t2 = t1 + Duration::from_millis(1);
            sm.tick(t2, snap(true, true, Some(t2), None), RECV_FRESH, EXPIRES);
            let t3 = t2 + Duration::from_millis(1);
            sm.tick(t3, snap(true, false, Some(t2), None), RECV_FRESH, EXPIRES);
            proptest::prop_assert_eq!(sm.current(), ConnectionState::Error);

            let t4 = t3 + Duration::from_millis(1);
            let snapshot = ConnectionSnapshot {
                channel_present,
                channel_alive,
                last_received: Some(t2),
                last_sent: None,
                channel_generation: generation,
            };
            sm.tick(t4, snapshot, RECV_FRESH, EXPIRES);
            proptest::prop_assert!(matches!(
                sm.current(),
                ConnectionState::Error | ConnectionState::Default
            ));
        }
    }
}
