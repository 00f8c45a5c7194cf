#![deny(unsafe_code)]
#![doc = "startrek-core: transport-agnostic contracts for the interstellar-transport message layer."]
#![doc = ""]
#![doc = "This crate defines the contracts shared by every transport implementation and by the"]
#![doc = "orchestration layer above it: addressing, the `Channel` I/O boundary, the `Ship` family"]
#![doc = "of envelope traits, the shared error taxonomy, and the `Clock` abstraction used to drive"]
#![doc = "every timed state transition deterministically under test."]

pub mod addr;
pub mod channel;
pub mod error;
pub mod ship;
pub mod time;

pub use addr::{AddressPair, SocketAddress};
pub use channel::{Channel, ReadOutcome};
pub use error::{ErrorCategory, TransportError};
pub use ship::{
    Arrival, ArrivalStatus, AssembleOutcome, Departure, DepartureStatus, Ship, ShipId, ShipParser,
};
pub use time::{Clock, MockClock, SystemClock};

/// Shared result alias, mirroring the contract layer's preference for a
/// crate-local `Result` over re-exporting `std::result::Result` blind.
pub type Result<T> = core::result::Result<T, TransportError>;
