//! Transparent TCP relay with byte-level tracing.
//!
//! Every connection accepted on the local listener is paired with a fresh
//! outbound connection to one fixed target. Bytes are copied in both
//! directions and every forwarded chunk is dumped to a [`TraceSink`].
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Engine -> Target
//!              |          |
//!         Multiplexer  Registry (downstream <-> upstream)
//!                         |
//!                     TraceSink
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use trance_relay::{NetEngine, RelayConfig, Target, TraceSink};
//!
//! let target = Target::resolve("example.com", 80)?;
//! let config = RelayConfig::new("0.0.0.0:9034".parse()?);
//! let mut engine = NetEngine::bind(&config, target.addr, TraceSink::stdout(true))?;
//! engine.run()?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod mux;
pub mod registry;
pub mod stats;
pub mod trace;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::RelayConfig;
pub use engine::{Engine, NetEngine, Shutdown};
pub use error::{MultiplexError, RegistryError, RelayError, TransportError};
pub use handle::{Handle, Pair, Role};
pub use mux::{Multiplexer, PollMultiplexer, Waker};
pub use registry::Registry;
pub use stats::RelayStats;
pub use trace::{Direction, TraceBuffer, TraceSink};
pub use transport::{NetTransport, Target, Transport};
