//! In-memory transport and multiplexer for engine tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;

use crate::error::{MultiplexError, TransportError};
use crate::handle::{Handle, HandleAllocator};
use crate::mux::Multiplexer;
use crate::transport::Transport;

/// Scripted outcome of one read call.
#[derive(Debug, Clone)]
pub enum ReadStep {
    Data(Vec<u8>),
    Eof,
    Fail(io::ErrorKind),
}

/// Scripted outcome of one write call.
#[derive(Debug, Clone, Copy)]
pub enum WriteStep {
    /// Accept at most this many bytes.
    Accept(usize),
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    handles: HandleAllocator,
    listeners: BTreeSet<Handle>,
    open: BTreeSet<Handle>,
    pending_accepts: VecDeque<SocketAddr>,
    fail_accept: Option<io::ErrorKind>,
    fail_connect: bool,
    last_accepted: Option<Handle>,
    connected: HashMap<Handle, SocketAddr>,
    reads: HashMap<Handle, VecDeque<ReadStep>>,
    writes: HashMap<Handle, VecDeque<WriteStep>>,
    written: HashMap<Handle, Vec<u8>>,
    write_calls: HashMap<Handle, usize>,
    close_calls: HashMap<Handle, usize>,
    source: (),
}

impl FakeTransport {
    pub fn queue_accept(&mut self, peer: SocketAddr) {
        self.pending_accepts.push_back(peer);
    }

    pub fn fail_next_accept(&mut self, kind: io::ErrorKind) {
        self.fail_accept = Some(kind);
    }

    pub fn fail_next_connect(&mut self) {
        self.fail_connect = true;
    }

    /// Queue data for `handle`. Data longer than the read buffer is handed
    /// out over several reads. An empty queue reads as would-block.
    pub fn push_read(&mut self, handle: Handle, step: ReadStep) {
        self.reads.entry(handle).or_default().push_back(step);
    }

    pub fn plan_write(&mut self, handle: Handle, step: WriteStep) {
        self.writes.entry(handle).or_default().push_back(step);
    }

    pub fn written(&self, handle: Handle) -> Vec<u8> {
        self.written.get(&handle).cloned().unwrap_or_default()
    }

    pub fn write_calls(&self, handle: Handle) -> usize {
        self.write_calls.get(&handle).copied().unwrap_or(0)
    }

    pub fn close_calls(&self, handle: Handle) -> usize {
        self.close_calls.get(&handle).copied().unwrap_or(0)
    }

    pub fn is_closed(&self, handle: Handle) -> bool {
        !self.open.contains(&handle)
    }

    pub fn last_accepted(&self) -> Option<Handle> {
        self.last_accepted
    }

    pub fn connected_to(&self, handle: Handle) -> Option<SocketAddr> {
        self.connected.get(&handle).copied()
    }

    fn open_handle(&mut self) -> Handle {
        let handle = self.handles.allocate();
        self.open.insert(handle);
        handle
    }
}

impl Transport for FakeTransport {
    type Source = ();

    fn listen(&mut self, _addr: SocketAddr) -> Result<Handle, TransportError> {
        let handle = self.open_handle();
        self.listeners.insert(handle);
        Ok(handle)
    }

    fn accept(&mut self, listener: Handle) -> Result<(Handle, SocketAddr), TransportError> {
        if !self.listeners.contains(&listener) {
            return Err(TransportError::UnknownHandle(listener));
        }
        if let Some(kind) = self.fail_accept.take() {
            return Err(TransportError::Accept(kind.into()));
        }
        let peer = self
            .pending_accepts
            .pop_front()
            .ok_or_else(|| TransportError::Accept(io::ErrorKind::WouldBlock.into()))?;
        let handle = self.open_handle();
        self.last_accepted = Some(handle);
        Ok((handle, peer))
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<Handle, TransportError> {
        if std::mem::take(&mut self.fail_connect) {
            return Err(TransportError::Connect {
                addr,
                source: io::ErrorKind::ConnectionRefused.into(),
            });
        }
        let handle = self.open_handle();
        self.connected.insert(handle, addr);
        Ok(handle)
    }

    fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.open.contains(&handle) {
            return Err(TransportError::UnknownHandle(handle));
        }
        let queue = self.reads.entry(handle).or_default();
        match queue.pop_front() {
            None => Err(TransportError::Read {
                handle,
                source: io::ErrorKind::WouldBlock.into(),
            }),
            Some(ReadStep::Eof) => Ok(0),
            Some(ReadStep::Fail(kind)) => Err(TransportError::Read {
                handle,
                source: kind.into(),
            }),
            Some(ReadStep::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    queue.push_front(ReadStep::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn write(&mut self, handle: Handle, buf: &[u8]) -> Result<usize, TransportError> {
        if !self.open.contains(&handle) {
            return Err(TransportError::UnknownHandle(handle));
        }
        *self.write_calls.entry(handle).or_default() += 1;
        let step = self
            .writes
            .get_mut(&handle)
            .and_then(VecDeque::pop_front)
            .unwrap_or(WriteStep::Accept(usize::MAX));
        match step {
            WriteStep::Fail(kind) => Err(TransportError::Write {
                handle,
                source: kind.into(),
            }),
            WriteStep::Accept(limit) => {
                let n = buf.len().min(limit);
                self.written
                    .entry(handle)
                    .or_default()
                    .extend_from_slice(&buf[..n]);
                Ok(n)
            }
        }
    }

    fn close(&mut self, handle: Handle) {
        *self.close_calls.entry(handle).or_default() += 1;
        self.open.remove(&handle);
        self.listeners.remove(&handle);
    }

    fn local_addr(&self, handle: Handle) -> Result<SocketAddr, TransportError> {
        if self.listeners.contains(&handle) {
            Ok(SocketAddr::from(([127, 0, 0, 1], 9034)))
        } else {
            Err(TransportError::UnknownHandle(handle))
        }
    }

    fn source(&mut self, handle: Handle) -> Option<&mut ()> {
        self.open.contains(&handle).then_some(&mut self.source)
    }
}

/// Multiplexer that replays queued ready sets and fails once they run out.
#[derive(Debug, Default)]
pub struct ScriptedMultiplexer {
    tracked: BTreeSet<Handle>,
    script: VecDeque<Result<Vec<Handle>, MultiplexError>>,
    requeued: Vec<Handle>,
    fail_track: bool,
}

impl ScriptedMultiplexer {
    pub fn push_ready(&mut self, ready: Vec<Handle>) {
        self.script.push_back(Ok(ready));
    }

    pub fn push_failure(&mut self, err: MultiplexError) {
        self.script.push_back(Err(err));
    }

    pub fn fail_next_track(&mut self) {
        self.fail_track = true;
    }

    /// Every requeue request seen so far, in order.
    pub fn requeued(&self) -> &[Handle] {
        &self.requeued
    }
}

impl Multiplexer for ScriptedMultiplexer {
    type Source = ();

    fn track(&mut self, handle: Handle, _source: &mut ()) -> Result<(), MultiplexError> {
        if std::mem::take(&mut self.fail_track) {
            return Err(MultiplexError::Register {
                handle,
                source: io::Error::other("registration refused"),
            });
        }
        self.tracked.insert(handle);
        Ok(())
    }

    fn untrack(&mut self, handle: Handle, _source: Option<&mut ()>) {
        self.tracked.remove(&handle);
    }

    fn is_tracked(&self, handle: Handle) -> bool {
        self.tracked.contains(&handle)
    }

    fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    fn requeue(&mut self, handle: Handle) {
        if self.tracked.contains(&handle) {
            self.requeued.push(handle);
        }
    }

    fn wait(&mut self) -> Result<Vec<Handle>, MultiplexError> {
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(MultiplexError::Poll(io::Error::other("script exhausted"))))
    }
}
