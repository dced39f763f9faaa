//! Operator-facing dump of relayed bytes.
//!
//! Each forwarded chunk becomes one block:
//!
//! ```text
//! >[
//! GET / HTTP/1.1
//! ]
//! ```
//!
//! `>[` marks client → server traffic and `<[` server → client traffic. With
//! colour enabled the whole block is wrapped in an ANSI colour and a reset.
//! Payload bytes are written exactly as received.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use colored::Color;
use tracing::warn;

use crate::handle::Role;

const RESET: &[u8] = b"\x1b[0m";

/// Direction a chunk travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Read from the downstream side, written upstream.
    ClientToServer,
    /// Read from the upstream side, written downstream.
    ServerToClient,
}

impl Direction {
    /// Direction of bytes read from a handle with `role`.
    pub fn from_role(role: Role) -> Option<Self> {
        match role {
            Role::Downstream => Some(Direction::ClientToServer),
            Role::Upstream => Some(Direction::ServerToClient),
            Role::Listener => None,
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Direction::ClientToServer => ">[",
            Direction::ServerToClient => "<[",
        }
    }

    pub fn color(self) -> Color {
        match self {
            Direction::ClientToServer => Color::Blue,
            Direction::ServerToClient => Color::Red,
        }
    }
}

/// Render one trace block.
pub fn render(direction: Direction, payload: &[u8], color: bool) -> Vec<u8> {
    let mut block = Vec::with_capacity(payload.len() + 16);
    if color {
        block.extend_from_slice(b"\x1b[");
        block.extend_from_slice(direction.color().to_fg_str().as_bytes());
        block.push(b'm');
    }
    block.extend_from_slice(direction.marker().as_bytes());
    block.push(b'\n');
    block.extend_from_slice(payload);
    block.push(b']');
    if color {
        block.extend_from_slice(RESET);
    }
    block.push(b'\n');
    block
}

/// Writes trace blocks to the console (or any writer).
pub struct TraceSink {
    out: Box<dyn Write + Send>,
    color: bool,
}

impl TraceSink {
    pub fn new(out: Box<dyn Write + Send>, color: bool) -> Self {
        Self { out, color }
    }

    pub fn stdout(color: bool) -> Self {
        Self::new(Box::new(io::stdout()), color)
    }

    /// A sink whose output can be read back through the returned buffer.
    pub fn in_memory(color: bool) -> (Self, TraceBuffer) {
        let buffer = TraceBuffer::default();
        (Self::new(Box::new(buffer.clone()), color), buffer)
    }

    /// Emit one block. Console failures are logged and otherwise ignored.
    pub fn emit(&mut self, direction: Direction, payload: &[u8]) {
        let block = render(direction, payload, self.color);
        let result = self
            .out
            .write_all(&block)
            .and_then(|()| self.out.flush());
        if let Err(e) = result {
            warn!(operation = "trace", error = %e, "failed to write trace");
        }
    }
}

impl std::fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSink")
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}

/// Shared in-memory trace output.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer(Arc<Mutex<Vec<u8>>>);

impl TraceBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().map(|buf| buf.clone()).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for TraceBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::other("trace buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
