//! Error taxonomy for the relay.
//!
//! Every error knows the name of the operation that failed so log lines can
//! carry it as a field. Fatal errors are the ones that stop the relay as a
//! whole; everything else only affects the connection it happened on.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::handle::Handle;

/// Failure of a socket primitive.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not bind the listening socket.
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Bound, but could not start listening.
    #[error("listen {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept: {0}")]
    Accept(#[source] io::Error),

    /// The remote host name did not resolve.
    #[error("resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("connect {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("read {handle}: {source}")]
    Read {
        handle: Handle,
        #[source]
        source: io::Error,
    },

    #[error("write {handle}: {source}")]
    Write {
        handle: Handle,
        #[source]
        source: io::Error,
    },

    #[error("local address: {0}")]
    LocalAddr(#[source] io::Error),

    /// The transport holds no socket for this handle.
    #[error("no socket for handle {0}")]
    UnknownHandle(Handle),
}

impl TransportError {
    /// Classify a listener setup failure. `std` binds and listens in one call,
    /// so the error kind decides which step is blamed.
    pub fn listener_setup(addr: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::AddrInUse
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::PermissionDenied => Self::Bind { addr, source },
            _ => Self::Listen { addr, source },
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            TransportError::Bind { .. } => "bind",
            TransportError::Listen { .. } => "listen",
            TransportError::Accept(_) => "accept",
            TransportError::Resolve { .. } => "resolve",
            TransportError::Connect { .. } => "connect",
            TransportError::Read { .. } => "read",
            TransportError::Write { .. } => "write",
            TransportError::LocalAddr(_) => "local_addr",
            TransportError::UnknownHandle(_) => "lookup",
        }
    }

    /// The socket has nothing to offer right now. Not a failure.
    pub fn is_would_block(&self) -> bool {
        let source = match self {
            TransportError::Accept(source)
            | TransportError::Read { source, .. }
            | TransportError::Write { source, .. } => source,
            _ => return false,
        };
        source.kind() == io::ErrorKind::WouldBlock
    }
}

/// Violations of the pairing bookkeeping.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handle {0} is not paired")]
    UnknownHandle(Handle),

    #[error("handle {0} is already registered")]
    AlreadyPaired(Handle),
}

/// Failure inside the readiness multiplexer.
#[derive(Debug, Error)]
pub enum MultiplexError {
    /// The readiness wait itself failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("multiplexer setup failed: {0}")]
    Setup(#[source] io::Error),

    /// One socket could not be added to the watched set.
    #[error("register {handle}: {source}")]
    Register {
        handle: Handle,
        #[source]
        source: io::Error,
    },
}

impl MultiplexError {
    pub fn operation(&self) -> &'static str {
        match self {
            MultiplexError::Poll(_) => "wait",
            MultiplexError::Setup(_) => "setup",
            MultiplexError::Register { .. } => "track",
        }
    }
}

/// Any error the relay engine can observe.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Multiplex(#[from] MultiplexError),

    /// The partner accepted zero bytes, i.e. it has gone away.
    #[error("write {0}: peer accepted no bytes")]
    PeerClosed(Handle),
}

impl RelayError {
    /// Name of the failing operation, used as a log field.
    pub fn operation(&self) -> &'static str {
        match self {
            RelayError::Transport(e) => e.operation(),
            RelayError::Registry(_) => "lookup",
            RelayError::Multiplex(e) => e.operation(),
            RelayError::PeerClosed(_) => "write",
        }
    }

    /// Whether the relay as a whole must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Multiplex(MultiplexError::Poll(_) | MultiplexError::Setup(_))
                | RelayError::Transport(
                    TransportError::Bind { .. }
                        | TransportError::Listen { .. }
                        | TransportError::Resolve { .. }
                )
        )
    }
}
