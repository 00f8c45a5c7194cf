//! Shared error taxonomy.
//!
//! Grounded on `spark_core::error::CoreError`'s code/category/cause/message
//! shape, collapsed to a single tier: this spec names no cluster/audit/
//! security domains that would justify the teacher's four-tier
//! `CoreError`/`SparkError`/`ImplError`/`DomainError` stack.

use std::fmt;

/// Coarse classification used by callers to decide whether an error is
/// expected control flow (`WouldBlock`, `Timeout`) or a genuine failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// An operation was attempted on a channel that is no longer open.
    Closed,
    /// The underlying OS socket reported an error.
    Socket,
    /// A non-blocking operation has no data/capacity right now. Masked
    /// before reaching application-level delegates (spec.md §7).
    WouldBlock,
    /// A timed operation did not complete before its deadline. Masked
    /// before reaching application-level delegates (spec.md §7).
    Timeout,
    /// A send or receive buffer could not hold the requested payload.
    BufferOverflow,
    /// A read produced fewer bytes than a complete frame requires.
    BufferUnderflow,
    /// A caller passed an argument that violates a documented precondition.
    IllegalArgument,
    /// A peer violated the wire-level framing contract.
    Protocol,
    /// A configuration value was missing, malformed, or out of range.
    Config,
}

impl ErrorCategory {
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorCategory::WouldBlock | ErrorCategory::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Closed => "closed",
            ErrorCategory::Socket => "socket",
            ErrorCategory::WouldBlock => "would_block",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::BufferOverflow => "buffer_overflow",
            ErrorCategory::BufferUnderflow => "buffer_underflow",
            ErrorCategory::IllegalArgument => "illegal_argument",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Config => "config",
        };
        f.write_str(label)
    }
}

/// The single error type surfaced across `startrek-core` and every crate
/// built on top of it.
#[derive(Debug, thiserror::Error)]
#[error("{category}: {message}")]
pub struct TransportError {
    category: ErrorCategory,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl TransportError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        category: ErrorCategory,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Closed, message)
    }

    pub fn would_block() -> Self {
        Self::new(ErrorCategory::WouldBlock, "operation would block")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Protocol, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::IllegalArgument, message)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock => TransportError::would_block(),
            ErrorKind::TimedOut => TransportError::timeout(err.to_string()),
            ErrorKind::NotConnected | ErrorKind::BrokenPipe | ErrorKind::ConnectionReset => {
                TransportError::with_cause(ErrorCategory::Closed, "channel closed", err)
            }
            _ => TransportError::with_cause(ErrorCategory::Socket, "socket operation failed", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_and_timeout_are_transient() {
        assert!(ErrorCategory::WouldBlock.is_transient());
        assert!(ErrorCategory::Timeout.is_transient());
        assert!(!ErrorCategory::Socket.is_transient());
    }

    #[test]
    fn io_error_would_block_maps_to_category() {
        let io = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        let err = TransportError::from(io);
        assert_eq!(err.category(), ErrorCategory::WouldBlock);
    }
}
