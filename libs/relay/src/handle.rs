//! Connection handles and role tags.

use std::fmt;

/// Opaque identifier for one open socket.
///
/// Handles are allocated from a monotonically increasing counter and are never
/// reused, so a stale handle can never alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source of fresh handles.
#[derive(Debug)]
pub struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> Handle {
        let handle = Handle(self.next);
        self.next += 1;
        handle
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Which side of the relay a handle belongs to.
///
/// Only used to pick the trace direction; relay semantics are identical for
/// both sides of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The local listening socket.
    Listener,
    /// Accepted from the local listener (client side).
    Downstream,
    /// Opened toward the remote target (server side).
    Upstream,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Listener => "listener",
            Role::Downstream => "downstream",
            Role::Upstream => "upstream",
        };
        f.write_str(name)
    }
}

/// A live relayed session: one downstream and one upstream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub downstream: Handle,
    pub upstream: Handle,
}

impl Pair {
    /// Both handles, downstream first.
    pub fn handles(&self) -> [Handle; 2] {
        [self.downstream, self.upstream]
    }
}
