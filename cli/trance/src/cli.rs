//! Command-line surface.
//!
//! `trance [-c] [-v...] <listen-port> <remote-host>[:<remote-port>]`
//!
//! Usage mistakes are not runtime errors: they print the usage text and the
//! process exits 0, just like `-h`.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{ArgAction, Parser};
use thiserror::Error;
use trance_relay::RelayConfig;

/// Port used when the remote argument has none.
pub const DEFAULT_REMOTE_PORT: u16 = 80;

pub const USAGE: &str = "trance [-c] <port> remote[:port]";

#[derive(Debug, Parser)]
#[command(name = "trance", version, about = "Transparent TCP relay that traces every byte it forwards")]
#[command(override_usage = USAGE)]
pub struct Cli {
    /// Disable coloured trace output
    #[arg(short = 'c', long = "no-color")]
    pub no_color: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Bytes staged per read/write hop
    #[arg(long, env = "TRANCE_BUFFER_SIZE", default_value_t = trance_relay::config::DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Outbound connect timeout in milliseconds
    #[arg(long, env = "TRANCE_CONNECT_TIMEOUT_MS", default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Write deadline in milliseconds (0 disables it)
    #[arg(long, env = "TRANCE_WRITE_TIMEOUT_MS", default_value_t = 5000)]
    pub write_timeout_ms: u64,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long = "log", env = "TRANCE_LOG")]
    pub log_level: Option<String>,

    /// <listen-port> <remote-host>[:<remote-port>]
    #[arg(num_args = 0.., value_name = "ARGS", allow_negative_numbers = true)]
    pub args: Vec<String>,
}

/// Why the positional arguments were rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("expected 2 arguments, got {0}")]
    ArgumentCount(usize),

    #[error("invalid listen port: {0:?}")]
    ListenPort(String),

    #[error("invalid remote port: {0:?}")]
    RemotePort(String),

    #[error("missing remote host")]
    RemoteHost,

    #[error("buffer size must be at least 1")]
    BufferSize,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub relay: RelayConfig,
    pub remote_host: String,
    pub remote_port: u16,
    pub color: bool,
    pub log_filter: String,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings, UsageError> {
        let [port, remote] = self.args.as_slice() else {
            return Err(UsageError::ArgumentCount(self.args.len()));
        };

        let listen_port = parse_port(port).ok_or_else(|| UsageError::ListenPort(port.clone()))?;
        let (remote_host, remote_port) = parse_remote(remote)?;

        if self.buffer_size == 0 {
            return Err(UsageError::BufferSize);
        }

        let mut relay = RelayConfig::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, listen_port)));
        relay.buffer_size = self.buffer_size;
        relay.connect_timeout = Duration::from_millis(self.connect_timeout_ms.max(1));
        relay.write_timeout = match self.write_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let log_filter = self
            .log_level
            .clone()
            .unwrap_or_else(|| verbosity_filter(self.verbose).to_string());

        Ok(Settings {
            relay,
            remote_host,
            remote_port,
            color: !self.no_color,
            log_filter,
        })
    }
}

/// Parse a port the way the tool always has: anything that is not a number
/// in 1..=65535 is rejected.
fn parse_port(raw: &str) -> Option<u16> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|port| (1..=i64::from(u16::MAX)).contains(port))
        .map(|port| port as u16)
}

/// Split `host[:port]` at the first colon.
fn parse_remote(raw: &str) -> Result<(String, u16), UsageError> {
    let (host, port) = match raw.split_once(':') {
        Some((host, port)) => {
            let port = parse_port(port).ok_or_else(|| UsageError::RemotePort(port.to_string()))?;
            (host, port)
        }
        None => (raw, DEFAULT_REMOTE_PORT),
    };
    if host.is_empty() {
        return Err(UsageError::RemoteHost);
    }
    Ok((host.to_string(), port))
}

fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}
