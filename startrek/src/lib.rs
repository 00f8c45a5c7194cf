//! startrek: Hub/Connection/Dock/Docker/Gate orchestration over the
//! `startrek-core` contracts.
//!
//! Data flow inbound: socket → `Channel` → `Hub::tick` →
//! `Connection::on_received` → `Docker::process_received` →
//! `Dock::assemble_arrival` → `Gate`'s `DockerDelegate::on_arrival`.
//!
//! Data flow outbound: `Gate::send` → `Docker::send_ship` →
//! `Dock::add_departure` → `Docker::tick` drains it onto `Connection::send`
//! → `Channel::send_to` → socket.
//!
//! Control flow: one driver thread repeatedly calls `Hub::tick` then
//! `Gate::tick`; each tick drains ready I/O, advances state machines,
//! purges expired tasks, and issues heartbeats (spec.md §4.8, §5, §9).

pub mod config;
pub mod connection;
pub mod dock;
pub mod docker;
pub mod gate;
pub mod hub;

pub use config::GateConfig;
pub use connection::{Connection, ConnectionDelegate, ConnectionState, SharedChannel};
pub use dock::Dock;
pub use docker::{Docker, DockerDelegate, DockerStatus, PlainFactory, PlainParser, ShipFactory};
pub use gate::Gate;
pub use hub::{ChannelFactory, Hub, TcpChannelFactory, UdpChannelFactory};

use std::sync::Arc;
use std::time::Duration;

/// Runs `hub.tick(); gate.tick()` on a fixed cadence, the "one driver loop"
/// spec.md §9 calls for. All delegate callbacks fire on whichever thread
/// calls `run`/`tick_once` — applications that need to fan out post to
/// their own executor rather than block a callback.
pub struct Driver {
    hub: Arc<Hub>,
    gate: Arc<Gate>,
    tick_interval: Duration,
}

impl Driver {
    pub fn new(hub: Arc<Hub>, gate: Arc<Gate>, tick_interval: Duration) -> Self {
        Self {
            hub,
            gate,
            tick_interval,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Runs exactly one `hub.tick(); gate.tick()` pair, with no sleep.
    /// Tests drive scenarios with this directly against a `MockClock`
    /// rather than waiting out `run`'s real sleeps.
    pub fn tick_once(&self) {
        self.hub.tick();
        self.gate.tick();
    }

    /// Runs `tick_once` on `tick_interval`, stopping once `should_continue`
    /// returns `false` (checked before each tick).
    pub fn run(&self, should_continue: impl Fn() -> bool) {
        while should_continue() {
            self.tick_once();
            std::thread::sleep(self.tick_interval);
        }
    }
}
