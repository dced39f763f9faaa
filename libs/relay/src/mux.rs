//! Readiness multiplexer.
//!
//! The engine only depends on the [`Multiplexer`] trait. [`PollMultiplexer`]
//! implements it on top of [`mio::Poll`].
//!
//! `mio` reports readiness edges, while the engine reads at most one buffer
//! per handle per cycle. A handle that may still hold data is handed back with
//! [`Multiplexer::requeue`] and is reported again on the next wait without
//! blocking.

use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace};

use crate::error::MultiplexError;
use crate::handle::Handle;

/// Waits for tracked handles to become readable.
pub trait Multiplexer {
    /// What the multiplexer needs in order to watch a handle.
    type Source: ?Sized;

    /// Start watching `handle`. Re-tracking replaces the previous registration.
    fn track(&mut self, handle: Handle, source: &mut Self::Source) -> Result<(), MultiplexError>;

    /// Stop watching `handle`. No-op if it is not tracked.
    ///
    /// `source` is `None` when the socket is already gone; the handle is
    /// forgotten either way.
    fn untrack(&mut self, handle: Handle, source: Option<&mut Self::Source>);

    fn is_tracked(&self, handle: Handle) -> bool;

    /// Number of tracked handles.
    fn tracked_len(&self) -> usize;

    /// Report `handle` again on the next wait even if no new readiness
    /// arrives for it. Ignored for untracked handles.
    fn requeue(&mut self, handle: Handle);

    /// Block until at least one tracked handle is readable.
    ///
    /// May return an empty set when woken through a [`Waker`]. There is no
    /// timeout.
    fn wait(&mut self) -> Result<Vec<Handle>, MultiplexError>;
}

/// Interrupts a blocked [`PollMultiplexer::wait`] from another thread.
#[derive(Debug, Clone)]
pub struct Waker {
    inner: Arc<mio::Waker>,
}

impl Waker {
    pub fn wake(&self) {
        if let Err(e) = self.inner.wake() {
            debug!(error = %e, "waker failed");
        }
    }
}

/// Handles start at 1, so token 0 never collides with a socket.
const WAKE_TOKEN: Token = Token(0);

const EVENTS_CAPACITY: usize = 1024;

fn token(handle: Handle) -> Result<Token, MultiplexError> {
    usize::try_from(handle.get())
        .map(Token)
        .map_err(|_| MultiplexError::Register {
            handle,
            source: io::Error::new(io::ErrorKind::InvalidInput, "handle exceeds token range"),
        })
}

/// `mio` based multiplexer.
#[derive(Debug)]
pub struct PollMultiplexer {
    poll: Poll,
    events: Events,
    tracked: BTreeSet<Handle>,
    requeued: BTreeSet<Handle>,
    waker: Arc<mio::Waker>,
}

impl PollMultiplexer {
    pub fn new() -> Result<Self, MultiplexError> {
        let poll = Poll::new().map_err(MultiplexError::Setup)?;
        let waker = mio::Waker::new(poll.registry(), WAKE_TOKEN).map_err(MultiplexError::Setup)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            tracked: BTreeSet::new(),
            requeued: BTreeSet::new(),
            waker: Arc::new(waker),
        })
    }

    pub fn waker(&self) -> Waker {
        Waker {
            inner: Arc::clone(&self.waker),
        }
    }
}

impl Multiplexer for PollMultiplexer {
    type Source = dyn Source;

    fn track(&mut self, handle: Handle, source: &mut Self::Source) -> Result<(), MultiplexError> {
        let token = token(handle)?;
        let registry = self.poll.registry();
        let result = if self.tracked.contains(&handle) {
            registry.reregister(source, token, Interest::READABLE)
        } else {
            registry.register(source, token, Interest::READABLE)
        };
        result.map_err(|source| MultiplexError::Register { handle, source })?;
        self.tracked.insert(handle);
        Ok(())
    }

    fn untrack(&mut self, handle: Handle, source: Option<&mut Self::Source>) {
        if !self.tracked.remove(&handle) {
            return;
        }
        self.requeued.remove(&handle);
        if let Some(source) = source {
            if let Err(e) = self.poll.registry().deregister(source) {
                debug!(handle = %handle, error = %e, "deregister failed");
            }
        }
    }

    fn is_tracked(&self, handle: Handle) -> bool {
        self.tracked.contains(&handle)
    }

    fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    fn requeue(&mut self, handle: Handle) {
        if self.tracked.contains(&handle) {
            self.requeued.insert(handle);
        }
    }

    fn wait(&mut self) -> Result<Vec<Handle>, MultiplexError> {
        // Pending work must not sit behind a blocking wait
        let timeout = if self.requeued.is_empty() {
            None
        } else {
            Some(Duration::ZERO)
        };

        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(MultiplexError::Poll(e)),
            }
        }

        let mut ready = std::mem::take(&mut self.requeued);
        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let handle = Handle::new(event.token().0 as u64);
            if self.tracked.contains(&handle) {
                ready.insert(handle);
            }
        }

        trace!(ready = ready.len(), tracked = self.tracked.len(), "poll returned");
        Ok(ready.into_iter().collect())
    }
}
