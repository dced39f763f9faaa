//! Relay engine.
//!
//! A single loop drives everything:
//!
//! ```text
//! wait for readiness -> for each ready handle:
//!     listener  => accept + connect + pair + track
//!     peer      => read -> write to partner -> trace
//! ```
//!
//! At most one buffer is read per handle per cycle. A handle whose read filled
//! the buffer, and the listener after every accept, are requeued with the
//! multiplexer so leftover data is picked up on the next cycle.
//!
//! Errors on one handle are logged and contained to that handle's pair. Only
//! a fatal multiplexer failure ends the loop with an error; a shutdown request
//! ends it cleanly after tearing down every live pair.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, TransportError};
use crate::handle::{Handle, Pair};
use crate::mux::{Multiplexer, PollMultiplexer, Waker};
use crate::registry::Registry;
use crate::stats::RelayStats;
use crate::trace::{Direction, TraceSink};
use crate::transport::{NetTransport, Transport};

/// Cancellation signal for a running engine.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    waker: Option<Waker>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also interrupts a blocked readiness wait.
    pub fn with_waker(waker: Waker) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Some(waker),
        }
    }

    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// The relay control loop.
pub struct Engine<T, M>
where
    T: Transport,
    M: Multiplexer<Source = T::Source>,
{
    transport: T,
    mux: M,
    registry: Registry,
    listener: Handle,
    target: SocketAddr,
    buffer: Vec<u8>,
    trace: TraceSink,
    stats: Arc<RelayStats>,
    shutdown: Shutdown,
}

/// Engine over `mio` sockets and readiness polling.
pub type NetEngine = Engine<NetTransport, PollMultiplexer>;

impl NetEngine {
    /// Bind the listener and wire a ready-to-run engine toward `target`.
    pub fn bind(
        config: &RelayConfig,
        target: SocketAddr,
        trace: TraceSink,
    ) -> Result<Self, RelayError> {
        let mut transport = NetTransport::new(config);
        let listener = transport.listen(config.listen_addr)?;
        let mux = PollMultiplexer::new()?;
        let shutdown = Shutdown::with_waker(mux.waker());

        let engine = Engine::new(transport, mux, listener, target, trace, config.buffer_size)?
            .with_shutdown(shutdown);

        info!(
            listen_addr = %engine.local_addr()?,
            target_addr = %target,
            buffer_size = config.buffer_size,
            "relay bound"
        );
        Ok(engine)
    }
}

impl<T, M> Engine<T, M>
where
    T: Transport,
    M: Multiplexer<Source = T::Source>,
{
    /// Create an engine around an already open `listener`.
    pub fn new(
        mut transport: T,
        mut mux: M,
        listener: Handle,
        target: SocketAddr,
        trace: TraceSink,
        buffer_size: usize,
    ) -> Result<Self, RelayError> {
        let source = transport
            .source(listener)
            .ok_or(TransportError::UnknownHandle(listener))?;
        mux.track(listener, source)?;

        Ok(Self {
            transport,
            mux,
            registry: Registry::new(listener),
            listener,
            target,
            buffer: vec![0u8; buffer_size.max(1)],
            trace,
            stats: Arc::new(RelayStats::default()),
            shutdown: Shutdown::new(),
        })
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn multiplexer(&self) -> &M {
        &self.mux
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.transport.local_addr(self.listener)?)
    }

    /// Run until shutdown or a fatal multiplexer failure.
    pub fn run(&mut self) -> Result<(), RelayError> {
        info!(target_addr = %self.target, "relay running");

        let result = loop {
            if self.shutdown.is_requested() {
                break Ok(());
            }
            match self.run_cycle() {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(operation = e.operation(), error = %e, "readiness wait failed");
                    break Err(e);
                }
                Err(e) => warn!(operation = e.operation(), error = %e, "readiness cycle failed"),
            }
        };

        self.close_all();
        result
    }

    /// One readiness cycle: wait, then dispatch every ready handle.
    pub fn run_cycle(&mut self) -> Result<(), RelayError> {
        let ready = self.mux.wait()?;
        for handle in ready {
            self.dispatch(handle);
        }
        Ok(())
    }

    /// Tear down the pair `handle` belongs to.
    ///
    /// Both handles are unpaired, untracked and closed together. Returns the
    /// pair, or `None` if it was already torn down.
    pub fn teardown(&mut self, handle: Handle) -> Option<Pair> {
        let pair = self.registry.unpair(handle)?;
        for h in pair.handles() {
            self.release(h);
        }
        self.stats.connection_closed();
        info!(
            downstream = %pair.downstream,
            upstream = %pair.upstream,
            "connection closed"
        );
        Some(pair)
    }

    /// Untrack and close one handle.
    fn release(&mut self, handle: Handle) {
        self.mux.untrack(handle, self.transport.source(handle));
        self.transport.close(handle);
    }

    /// Start watching a freshly opened socket.
    fn watch(&mut self, handle: Handle) -> Result<(), RelayError> {
        let source = self
            .transport
            .source(handle)
            .ok_or(TransportError::UnknownHandle(handle))?;
        self.mux.track(handle, source)?;
        Ok(())
    }

    fn dispatch(&mut self, handle: Handle) {
        let result = if handle == self.listener {
            self.accept_pair()
        } else if !self.mux.is_tracked(handle) {
            // Torn down earlier in this cycle via its partner
            return;
        } else {
            self.relay_from(handle)
        };

        if let Err(e) = result {
            self.stats.connection_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation = e.operation(),
                handle = %handle,
                error = %e,
                "connection error"
            );
        }
    }

    fn accept_pair(&mut self) -> Result<(), RelayError> {
        let (downstream, peer) = match self.transport.accept(self.listener) {
            Ok(accepted) => accepted,
            Err(e) if e.is_would_block() => {
                trace!("no pending connection");
                return Ok(());
            }
            Err(e) => {
                self.stats.accept_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        // More connections may be queued behind this one
        self.mux.requeue(self.listener);

        let upstream = match self.transport.connect(self.target) {
            Ok(upstream) => upstream,
            Err(e) => {
                self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                self.transport.close(downstream);
                return Err(e.into());
            }
        };

        if let Err(e) = self.registry.pair(downstream, upstream) {
            self.transport.close(downstream);
            self.transport.close(upstream);
            return Err(e.into());
        }
        self.stats.connection_opened();

        let watched = self
            .watch(downstream)
            .and_then(|()| self.watch(upstream));
        if let Err(e) = watched {
            self.teardown(downstream);
            return Err(e);
        }

        info!(
            peer_addr = %peer,
            downstream = %downstream,
            upstream = %upstream,
            "connection paired"
        );
        Ok(())
    }

    fn relay_from(&mut self, handle: Handle) -> Result<(), RelayError> {
        let partner = match self.registry.lookup(handle) {
            Ok(partner) => partner,
            Err(e) => {
                // Tracked but unpaired: bookkeeping is broken for this handle
                error!(handle = %handle, "tracked handle has no partner");
                self.release(handle);
                return Err(e.into());
            }
        };
        let direction = self
            .registry
            .role_of(handle)
            .and_then(Direction::from_role)
            .unwrap_or(Direction::ClientToServer);

        let len = match self.transport.read(handle, &mut self.buffer) {
            Ok(0) => {
                debug!(handle = %handle, "end of stream");
                self.teardown(handle);
                return Ok(());
            }
            Ok(len) => len,
            Err(e) if e.is_would_block() => {
                trace!(handle = %handle, "spurious readiness");
                return Ok(());
            }
            Err(e) => {
                self.teardown(handle);
                return Err(e.into());
            }
        };

        if let Err(e) = self.forward(partner, len) {
            self.teardown(handle);
            return Err(e);
        }

        let counter = match direction {
            Direction::ClientToServer => &self.stats.bytes_to_upstream,
            Direction::ServerToClient => &self.stats.bytes_to_downstream,
        };
        counter.fetch_add(len as u64, Ordering::Relaxed);
        self.trace.emit(direction, &self.buffer[..len]);

        if len == self.buffer.len() {
            self.mux.requeue(handle);
        }
        Ok(())
    }

    /// Write `buffer[..len]` to `partner`, retrying the unsent tail.
    fn forward(&mut self, partner: Handle, len: usize) -> Result<(), RelayError> {
        let mut sent = 0;
        while sent < len {
            match self.transport.write(partner, &self.buffer[sent..len])? {
                0 => return Err(RelayError::PeerClosed(partner)),
                n => sent += n,
            }
        }
        Ok(())
    }

    fn close_all(&mut self) {
        for pair in self.registry.pairs() {
            self.teardown(pair.downstream);
        }
        self.release(self.listener);

        info!(
            accepted = self.stats.accepted(),
            closed = self.stats.closed(),
            bytes_to_upstream = self.stats.bytes_to_upstream.load(Ordering::Relaxed),
            bytes_to_downstream = self.stats.bytes_to_downstream.load(Ordering::Relaxed),
            "relay stopped"
        );
    }
}
