//! The outbound `ConnectionDelegate` interface (spec.md §6).

use startrek_core::TransportError;

use super::state::ConnectionState;
use super::Connection;

/// Callbacks a Hub user implements to observe one Connection's lifecycle.
/// All calls happen on the driver thread (spec.md §9's "suspendable
/// driver" note) — implementations that need to fan out should post to
/// their own executor rather than block here.
pub trait ConnectionDelegate: Send + Sync {
    fn on_state_changed(&self, conn: &Connection, prev: ConnectionState, curr: ConnectionState);

    fn on_received(&self, conn: &Connection, data: &[u8]);

    fn on_sent(&self, conn: &Connection, data: &[u8], length: usize);

    fn on_failed_to_send(&self, conn: &Connection, data: &[u8], error: &TransportError);

    fn on_error(&self, conn: &Connection, error: &TransportError);
}
