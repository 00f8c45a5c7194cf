//! The `Channel` I/O boundary.
//!
//! Grounded on `spark_transport::connection::TransportConnection`'s split
//! between state queries (`is_open`/`is_bound`/`is_connected`) and I/O
//! operations, adapted from that crate's `async fn` + `Future` shape to a
//! synchronous, non-blocking shape: spec.md §5 drives every channel from one
//! polling thread, so there is no executor to hand a `Future` to.

use std::time::Duration;

use crate::addr::SocketAddress;
use crate::error::TransportError;

/// The outcome of a single non-blocking `read`.
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were written into the caller's buffer.
    Data(usize),
    /// No data is available right now; the caller should retry on a later
    /// tick. Never surfaced to application delegates (spec.md §7).
    WouldBlock,
    /// The peer closed the connection; no further reads will produce data.
    Eof,
}

/// A bidirectional byte channel over one transport (TCP or UDP), bound to at
/// most one local address and at most one remote address at a time.
///
/// Implementations must never block the calling thread: every I/O method
/// returns promptly, signaling unavailability through `ReadOutcome::WouldBlock`
/// or a `TransportError` of category `WouldBlock`.
pub trait Channel: Send {
    /// The peer address, once connected. `None` for an unconnected UDP
    /// channel that has not yet received from a fixed peer.
    fn remote(&self) -> Option<SocketAddress>;

    /// The local address, once bound.
    fn local(&self) -> Option<SocketAddress>;

    fn is_open(&self) -> bool;

    fn is_bound(&self) -> bool;

    fn is_connected(&self) -> bool;

    fn is_blocking(&self) -> bool;

    /// True when the channel can be used for I/O right now. The default
    /// definition is "open and (bound or connected)"; most implementations
    /// never need to override it.
    fn is_alive(&self) -> bool {
        self.is_open() && (self.is_bound() || self.is_connected())
    }

    fn set_blocking(&mut self, blocking: bool) -> Result<(), TransportError>;

    fn bind(&mut self, local: SocketAddress) -> Result<(), TransportError>;

    fn connect(&mut self, remote: SocketAddress) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Reads into `buf` from the connected peer. Returns `ReadOutcome::Data(n)`
    /// with `n` possibly `0` only when `buf` is empty.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError>;

    /// Reads one datagram (or stream chunk) and its source address, for
    /// channels that have not fixed a single remote peer.
    fn receive(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(ReadOutcome, Option<SocketAddress>), TransportError>;

    /// Writes `buf` to the connected peer, returning the number of bytes
    /// accepted (may be less than `buf.len()` for a stream channel under
    /// backpressure).
    fn send(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Writes `buf` to `target`, for channels without a fixed remote peer.
    fn send_to(&mut self, buf: &[u8], target: &SocketAddress) -> Result<usize, TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

/// How long a socket poll may wait before giving up, used by transport
/// implementations that multiplex several channels behind one `poll`/`select`
/// call. Not used by the single-channel, purely non-blocking read path.
pub const NO_WAIT: Duration = Duration::ZERO;
