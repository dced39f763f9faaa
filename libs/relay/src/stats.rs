//! Relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for a relay.
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Total connections accepted and paired with an upstream.
    pub connections_accepted: AtomicU64,
    /// Pairs currently live.
    pub connections_active: AtomicU64,
    /// Pairs torn down.
    pub connections_closed: AtomicU64,
    /// Accept calls that failed.
    pub accept_failures: AtomicU64,
    /// Outbound connects that failed.
    pub connect_failures: AtomicU64,
    /// Non-fatal errors of any kind.
    pub connection_errors: AtomicU64,
    /// Bytes forwarded client → server.
    pub bytes_to_upstream: AtomicU64,
    /// Bytes forwarded server → client.
    pub bytes_to_downstream: AtomicU64,
}

impl RelayStats {
    pub(crate) fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.connections_accepted.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }
}
