//! Socket primitives used by the relay engine.
//!
//! [`Transport`] is the seam between the engine and the operating system.
//! [`NetTransport`] backs it with non-blocking `mio` sockets. A write that
//! finds the send buffer full falls back to a blocking write bounded by the
//! configured deadline, so a stalled peer cannot wedge the relay loop.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use socket2::SockRef;
use tracing::debug;

use crate::config::RelayConfig;
use crate::error::TransportError;
use crate::handle::{Handle, HandleAllocator};

/// Raw socket capability consumed by the engine.
pub trait Transport {
    /// Whatever the paired multiplexer needs to watch a handle.
    type Source: ?Sized;

    fn listen(&mut self, addr: SocketAddr) -> Result<Handle, TransportError>;

    /// Accept one pending connection on `listener`. Fails with a would-block
    /// error when nothing is pending.
    fn accept(&mut self, listener: Handle) -> Result<(Handle, SocketAddr), TransportError>;

    fn connect(&mut self, addr: SocketAddr) -> Result<Handle, TransportError>;

    /// Read into `buf`. `Ok(0)` means end of stream; a would-block error means
    /// no data right now.
    fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write from `buf`, returning how many bytes the peer accepted.
    fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<usize, TransportError>;

    /// Close `handle`. Closing an unknown or already closed handle is a no-op.
    fn close(&mut self, handle: Handle);

    fn local_addr(&self, handle: Handle) -> Result<SocketAddr, TransportError>;

    fn source(&mut self, handle: Handle) -> Option<&mut Self::Source>;
}

/// The fixed upstream every relayed connection is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub addr: SocketAddr,
}

impl Target {
    /// Resolve `host` once. IPv4 addresses are preferred when the name has
    /// both families.
    pub fn resolve(host: &str, port: u16) -> Result<Self, TransportError> {
        let resolve_err = |source: io::Error| TransportError::Resolve {
            host: host.to_string(),
            source,
        };

        let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(resolve_err)?.collect();
        let addr = addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                resolve_err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no addresses returned",
                ))
            })?;

        debug!(host, port, addr = %addr, "target resolved");
        Ok(Self {
            host: host.to_string(),
            port,
            addr,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Non-blocking `mio` transport.
#[derive(Debug)]
pub struct NetTransport {
    handles: HandleAllocator,
    listeners: HashMap<Handle, TcpListener>,
    streams: HashMap<Handle, TcpStream>,
    connect_timeout: Duration,
    write_timeout: Option<Duration>,
}

impl NetTransport {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            handles: HandleAllocator::new(),
            listeners: HashMap::new(),
            streams: HashMap::new(),
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
        }
    }

    /// Number of open sockets, listeners included.
    pub fn open_count(&self) -> usize {
        self.listeners.len() + self.streams.len()
    }

    fn stream(&self, handle: Handle) -> Result<&TcpStream, TransportError> {
        self.streams
            .get(&handle)
            .ok_or(TransportError::UnknownHandle(handle))
    }

    fn register_stream(&mut self, stream: TcpStream) -> io::Result<Handle> {
        stream.set_nodelay(true)?;
        // Only consulted while a stalled write runs in blocking mode
        SockRef::from(&stream).set_write_timeout(self.write_timeout)?;
        let handle = self.handles.allocate();
        self.streams.insert(handle, stream);
        Ok(handle)
    }
}

fn retry_interrupted<F>(mut op: F) -> io::Result<usize>
where
    F: FnMut() -> io::Result<usize>,
{
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Write once in blocking mode, bounded by the socket's send timeout, then
/// switch back to non-blocking mode.
fn write_with_deadline(stream: &TcpStream, buf: &[u8]) -> io::Result<usize> {
    let socket = SockRef::from(stream);
    socket.set_nonblocking(false)?;
    let result = retry_interrupted(|| (&*stream).write(buf));
    socket.set_nonblocking(true)?;

    match result {
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "write deadline elapsed",
        )),
        result => result,
    }
}

impl Transport for NetTransport {
    type Source = dyn Source;

    fn listen(&mut self, addr: SocketAddr) -> Result<Handle, TransportError> {
        let listener =
            TcpListener::bind(addr).map_err(|e| TransportError::listener_setup(addr, e))?;
        let handle = self.handles.allocate();
        self.listeners.insert(handle, listener);
        Ok(handle)
    }

    fn accept(&mut self, listener: Handle) -> Result<(Handle, SocketAddr), TransportError> {
        let socket = self
            .listeners
            .get(&listener)
            .ok_or(TransportError::UnknownHandle(listener))?;
        let (stream, peer) = socket.accept().map_err(TransportError::Accept)?;
        let handle = self
            .register_stream(stream)
            .map_err(TransportError::Accept)?;
        Ok((handle, peer))
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<Handle, TransportError> {
        let connect_err = |source: io::Error| TransportError::Connect { addr, source };
        let stream =
            std::net::TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(connect_err)?;
        stream.set_nonblocking(true).map_err(connect_err)?;
        self.register_stream(TcpStream::from_std(stream))
            .map_err(connect_err)
    }

    fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut stream = self.stream(handle)?;
        retry_interrupted(|| stream.read(buf)).map_err(|source| TransportError::Read { handle, source })
    }

    fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<usize, TransportError> {
        let mut stream = self.stream(handle)?;
        let result = match retry_interrupted(|| stream.write(buf)) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(handle = %handle, "send buffer full, waiting for the peer");
                write_with_deadline(stream, buf)
            }
            result => result,
        };
        result.map_err(|source| TransportError::Write { handle, source })
    }

    fn close(&mut self, handle: Handle) {
        // Dropping the socket closes the descriptor
        if self.streams.remove(&handle).is_none() {
            self.listeners.remove(&handle);
        }
    }

    fn local_addr(&self, handle: Handle) -> Result<SocketAddr, TransportError> {
        let result = if let Some(listener) = self.listeners.get(&handle) {
            listener.local_addr()
        } else if let Some(stream) = self.streams.get(&handle) {
            stream.local_addr()
        } else {
            return Err(TransportError::UnknownHandle(handle));
        };
        result.map_err(TransportError::LocalAddr)
    }

    fn source(&mut self, handle: Handle) -> Option<&mut Self::Source> {
        if let Some(listener) = self.listeners.get_mut(&handle) {
            return Some(listener as &mut dyn Source);
        }
        self.streams
            .get_mut(&handle)
            .map(|stream| stream as &mut dyn Source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn transport() -> NetTransport {
        NetTransport::new(&RelayConfig::new("127.0.0.1:0".parse().unwrap()))
    }

    /// Read until something other than would-block comes back.
    fn read_ready(net: &mut NetTransport, handle: Handle, buf: &mut [u8]) -> usize {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match net.read(handle, buf) {
                Err(e) if e.is_would_block() && Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5));
                }
                result => return result.unwrap(),
            }
        }
    }

    /// Accept until the pending connection shows up.
    fn accept_ready(net: &mut NetTransport, listener: Handle) -> (Handle, SocketAddr) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match net.accept(listener) {
                Err(e) if e.is_would_block() && Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(5));
                }
                result => return result.unwrap(),
            }
        }
    }

    #[test]
    fn test_resolve_prefers_ipv4() {
        let target = Target::resolve("localhost", 8080).unwrap();
        assert_eq!(target.port, 8080);
        assert_eq!(target.addr.port(), 8080);
        assert!(target.addr.ip().is_loopback());
        assert_eq!(target.to_string(), "localhost:8080");
    }

    #[test]
    fn test_resolve_failure() {
        let err = Target::resolve("name.invalid.", 80).unwrap_err();
        assert_eq!(err.operation(), "resolve");
    }

    #[test]
    fn test_accept_without_pending_connection_would_block() {
        let mut net = transport();
        let listener = net.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let err = net.accept(listener).unwrap_err();
        assert!(err.is_would_block());
        assert_eq!(net.open_count(), 1);
    }

    #[test]
    fn test_accept_connect_read_write() {
        let mut net = transport();
        let listener = net.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = net.local_addr(listener).unwrap();

        let outbound = net.connect(addr).unwrap();
        let (inbound, peer) = accept_ready(&mut net, listener);
        assert_eq!(peer, net.local_addr(outbound).unwrap());
        assert_eq!(net.open_count(), 3);

        let mut buf = [0u8; 16];
        assert!(net.read(inbound, &mut buf).unwrap_err().is_would_block());

        assert_eq!(net.write(outbound, b"hello").unwrap(), 5);
        let n = read_ready(&mut net, inbound, &mut buf);
        assert_eq!(&buf[..n], b"hello");

        net.close(outbound);
        assert_eq!(read_ready(&mut net, inbound, &mut buf), 0);
    }

    #[test]
    fn test_stalled_write_hits_deadline() {
        let mut config = RelayConfig::new("127.0.0.1:0".parse().unwrap());
        config.write_timeout = Some(Duration::from_millis(100));
        let mut net = NetTransport::new(&config);
        let listener = net.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = net.local_addr(listener).unwrap();

        let outbound = net.connect(addr).unwrap();
        // Accepted but never read from
        let (_inbound, _) = accept_ready(&mut net, listener);

        let chunk = vec![0u8; 64 * 1024];
        let started = Instant::now();
        let err = loop {
            match net.write(outbound, &chunk) {
                Ok(_) => assert!(started.elapsed() < Duration::from_secs(10), "never stalled"),
                Err(e) => break e,
            }
        };

        assert_eq!(err.operation(), "write");
        let TransportError::Write { source, .. } = err else {
            panic!("expected a write error");
        };
        assert_eq!(source.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut net = transport();
        let listener = net.listen("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(net.source(listener).is_some());

        net.close(listener);
        net.close(listener);
        assert!(net.source(listener).is_none());
        assert_eq!(net.open_count(), 0);
    }

    #[test]
    fn test_unknown_handle() {
        let mut net = transport();
        let mut buf = [0u8; 4];
        let err = net.read(Handle::new(42), &mut buf).unwrap_err();
        assert!(matches!(err, TransportError::UnknownHandle(h) if h == Handle::new(42)));
    }

    #[test]
    fn test_connect_refused() {
        let mut net = transport();
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = probe.local_addr().unwrap();
        drop(probe);

        let err = net.connect(dead).unwrap_err();
        assert_eq!(err.operation(), "connect");
        assert_eq!(net.open_count(), 0);
    }
}
