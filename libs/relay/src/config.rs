//! Relay tuning knobs.

use std::net::SocketAddr;
use std::time::Duration;

/// Default size of the transfer buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default connect timeout toward the target.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default write deadline for forwarding one chunk.
pub const DEFAULT_WRITE_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

/// Configuration for one relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Bytes staged per read/write hop.
    pub buffer_size: usize,
    /// Connect timeout toward the target.
    pub connect_timeout: Duration,
    /// Write deadline per write call. `None` blocks without bound.
    pub write_timeout: Option<Duration>,
}

impl RelayConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}
