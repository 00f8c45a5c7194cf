//! Per-peer byte pipe with timed state and delegate callbacks (spec.md §3,
//! §4.3, §4.4).

pub mod delegate;
pub mod state;

pub use delegate::ConnectionDelegate;
pub use state::{ConnectionSnapshot, ConnectionState, StateMachine};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use startrek_core::{Channel, Clock, SocketAddress, TransportError};

/// A `Channel` shared between a `Hub`'s channel registry and the
/// `Connection`(s) built on top of it — an `ActiveConnection`'s reconnect
/// path replaces this handle's contents without invalidating clones anyone
/// else holds.
pub type SharedChannel = Arc<Mutex<Box<dyn Channel>>>;

/// A per-peer byte pipe. `remote`/`local` are fixed at construction;
/// everything else is interior-mutable so the driver thread (ticking) and
/// application threads (`send`) can both hold a `&Connection` concurrently,
/// per spec.md §5's serialization requirement (enforced by callers, not by
/// `Connection` itself — it only guards its own fields).
pub struct Connection {
    remote: SocketAddress,
    local: SocketAddress,
    channel: Mutex<Option<SharedChannel>>,
    channel_generation: AtomicU64,
    last_sent_time: Mutex<Option<Instant>>,
    last_received_time: Mutex<Option<Instant>>,
    state: Mutex<StateMachine>,
    delegate: Arc<dyn ConnectionDelegate>,
    clock: Arc<dyn Clock>,
    /// `ActiveConnection` (true) asks the Hub for a fresh channel on loss;
    /// `BaseConnection` (false) just errors out (spec.md §4.4).
    active: bool,
}

impl Connection {
    pub fn new(
        remote: SocketAddress,
        local: SocketAddress,
        channel: Option<SharedChannel>,
        delegate: Arc<dyn ConnectionDelegate>,
        clock: Arc<dyn Clock>,
        active: bool,
    ) -> Self {
        let now = clock.now();
        Self {
            remote,
            local,
            channel: Mutex::new(channel),
            channel_generation: AtomicU64::new(0),
            last_sent_time: Mutex::new(None),
            last_received_time: Mutex::new(None),
            state: Mutex::new(StateMachine::new(now)),
            delegate,
            clock,
            active,
        }
    }

    pub fn remote(&self) -> &SocketAddress {
        &self.remote
    }

    pub fn local(&self) -> &SocketAddress {
        &self.local
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().current()
    }

    pub fn last_sent_time(&self) -> Option<Instant> {
        *self.last_sent_time.lock()
    }

    pub fn last_received_time(&self) -> Option<Instant> {
        *self.last_received_time.lock()
    }

    pub fn channel(&self) -> Option<SharedChannel> {
        self.channel.lock().clone()
    }

    fn channel_alive(&self) -> bool {
        match self.channel.lock().as_ref() {
            Some(ch) => ch.lock().is_alive(),
            None => false,
        }
    }

    /// Installs a fresh channel, bumping the generation counter so the state
    /// machine can detect `Error → Default` on the next tick.
    pub fn replace_channel(&self, channel: SharedChannel) {
        *self.channel.lock() = Some(channel);
        self.channel_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Sends `data` to `remote` over the current channel. Returns the
    /// number of bytes actually written (spec.md §4.4: "callers decide
    /// whether to retry or fragment").
    ///
    /// On failure, fires `on_failed_to_send`, closes the channel, and
    /// returns `0`.
    pub fn send(&self, data: &[u8]) -> i32 {
        let channel = match self.channel.lock().clone() {
            Some(c) => c,
            None => {
                self.delegate.on_error(self, &TransportError::closed("no channel attached"));
                return 0;
            }
        };

        let remote = self.remote.clone();
        let result = {
            let mut guard = channel.lock();
            guard.send_to(data, &remote)
        };

        match result {
            Ok(n) => {
                *self.last_sent_time.lock() = Some(self.clock.now());
                self.delegate.on_sent(self, data, n);
                n as i32
            }
            Err(err) => {
                warn!(target: "startrek::connection", error = %err, "send failed");
                self.delegate.on_failed_to_send(self, data, &err);
                self.close();
                0
            }
        }
    }

    /// Records inbound bytes and forwards them to the delegate.
    pub fn on_received(&self, data: &[u8]) {
        *self.last_received_time.lock() = Some(self.clock.now());
        self.delegate.on_received(self, data);
    }

    /// Closes the underlying channel. The state machine observes the dead
    /// channel and transitions to `Error` on its next tick — closing does
    /// not force an immediate state change (spec.md §4.4).
    pub fn close(&self) {
        if let Some(channel) = self.channel.lock().take() {
            let _ = channel.lock().close();
        }
    }

    /// Evaluates the state machine once. Returns `Some((prev, curr))` and
    /// dispatches `on_state_changed` when a transition fires.
    pub fn tick(&self, now: Instant, recv_fresh: Duration, expires: Duration) -> Option<(ConnectionState, ConnectionState)> {
        let snapshot = ConnectionSnapshot {
            channel_present: self.channel.lock().is_some(),
            channel_alive: self.channel_alive(),
            last_received: self.last_received_time(),
            last_sent: self.last_sent_time(),
            channel_generation: self.channel_generation.load(Ordering::SeqCst),
        };

        let transition = self.state.lock().tick(now, snapshot, recv_fresh, expires);
        if let Some((prev, curr)) = transition {
            debug!(target: "startrek::connection", ?prev, ?curr, "connection state changed");
            self.delegate.on_state_changed(self, prev, curr);
        }
        transition
    }
}
