//! Byte-level channels to instruments.
//!
//! A [`Transport`] is the leaf dependency of the instrument stack: it moves
//! bytes and owns no graph state. Drivers talk to devices exclusively through
//! this trait, so a driver can run over TCP, an in-process simulator, or a
//! mock in tests without changes.
//!
//! Connection strings follow the `nick:driver:transportType:path[:extraArgs...]`
//! layout. [`TransportTarget::parse`] splits them and [`open_transport`] builds
//! the matching transport.

pub mod sim;
pub mod socket;

pub use sim::SimTransport;
pub use socket::SocketTransport;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by transports and connection-string parsing.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid connection string '{0}': expected nick:driver:transport:path")]
    InvalidTarget(String),

    #[error("Unsupported transport type '{0}'")]
    UnsupportedTransport(String),

    #[error("Timed out after {0:?} waiting for data")]
    Timeout(Duration),

    #[error("Transport closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-level channel to an instrument.
///
/// Messages are newline-terminated; `receive` returns one message without its
/// terminator. Implementations must honour the timeout and never block
/// indefinitely.
pub trait Transport: Send {
    /// Transport type name as used in connection strings (e.g. `lan`).
    fn name(&self) -> &str;

    /// Transport-specific address (the `path` part of the connection string).
    fn path(&self) -> &str;

    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;

    /// Send raw bytes.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Receive one message, waiting at most `timeout`.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Close the channel. Further sends fail with [`TransportError::Closed`].
    fn close(&mut self);

    /// Send a newline-terminated command.
    fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(b'\n');
        self.send(&line)
    }

    /// Send a command and read back one text reply.
    fn query(&mut self, command: &str, timeout: Duration) -> Result<String, TransportError> {
        self.send_command(command)?;
        let reply = self.receive(timeout)?;
        Ok(String::from_utf8_lossy(&reply).trim().to_string())
    }
}

/// Parsed `nick:driver:transportType:path[:extraArgs...]` connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
    pub nickname: String,
    pub driver: String,
    pub transport: String,
    /// Everything after the transport type, re-joined with `:`.
    pub path: String,
}

impl TransportTarget {
    /// Parse a connection string. At least four fields are required; any
    /// extra fields belong to the path (e.g. `host:port`).
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() < 4 || fields[..3].iter().any(|f| f.is_empty()) {
            return Err(TransportError::InvalidTarget(s.to_string()));
        }
        Ok(Self {
            nickname: fields[0].to_string(),
            driver: fields[1].to_string(),
            transport: fields[2].to_string(),
            path: fields[3..].join(":"),
        })
    }

    /// The path split back into its colon-delimited fields.
    pub fn path_fields(&self) -> Vec<&str> {
        self.path.split(':').collect()
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.nickname, self.driver, self.transport, self.path
        )
    }
}

/// Open the transport named by a parsed target.
pub fn open_transport(target: &TransportTarget) -> Result<Box<dyn Transport>, TransportError> {
    match target.transport.as_str() {
        "lan" => Ok(Box::new(SocketTransport::connect(&target.path)?)),
        "sim" => Ok(Box::new(SimTransport::from_path(&target.path)?)),
        other => Err(TransportError::UnsupportedTransport(other.to_string())),
    }
}
