//! Gate-wide tunables.
//!
//! Grounded on `spark_core::configuration::value`'s plain-struct-over-profile
//! approach: a single flat struct with `serde` derives and named
//! constructors, rather than that crate's full layered-source/profile
//! machinery, which has no counterpart named in this workspace.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Recognized options, matching the table in the external-interfaces section
/// verbatim (field names carry the `_ms` suffix the wire/JSON form uses;
/// accessors return `Duration`).
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct GateConfig {
    expires_ms: u64,
    recv_fresh_ms: u64,
    reassembly_ms: u64,
    max_tries: u32,
    heartbeat_ms: u64,
    purge_ms: u64,
    advance_party_cap: usize,
}

impl GateConfig {
    pub fn expires(&self) -> Duration {
        Duration::from_millis(self.expires_ms)
    }

    pub fn recv_fresh(&self) -> Duration {
        Duration::from_millis(self.recv_fresh_ms)
    }

    pub fn reassembly_window(&self) -> Duration {
        Duration::from_millis(self.reassembly_ms)
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.purge_ms)
    }

    pub fn advance_party_cap(&self) -> usize {
        self.advance_party_cap
    }
}

impl Default for GateConfig {
    /// The suggested defaults from spec.md §6.
    fn default() -> Self {
        Self {
            expires_ms: 16_000,
            recv_fresh_ms: 32_000,
            reassembly_ms: 300_000,
            max_tries: 3,
            heartbeat_ms: 30_000,
            purge_ms: 60_000,
            advance_party_cap: 8,
        }
    }
}

impl GateConfig {
    /// Shrinks every timer to millisecond scale, for integration tests that
    /// exercise timed transitions without waiting real wall-clock seconds —
    /// paired with `MockClock` rather than real sleeps.
    pub fn aggressive() -> Self {
        Self {
            expires_ms: 50,
            recv_fresh_ms: 100,
            reassembly_ms: 500,
            max_tries: 3,
            heartbeat_ms: 80,
            purge_ms: 150,
            advance_party_cap: 8,
        }
    }
}
