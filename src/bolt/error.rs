//! Bolt protocol error types.

use std::fmt;
use std::io;

use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt wire-level errors.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// PackStream serialization error
    PackStream(PackStreamError),

    /// Protocol error (invalid message format, unexpected reply, etc.)
    Protocol(String),

    /// Authentication error (LOGON rejected)
    Authentication(String),

    /// Connection error
    Connection(String),

    /// Message exceeded the reassembly limit
    MessageTooLarge { size: usize, max: usize },

    /// Read or write deadline expired
    Timeout,

    /// Connection closed by the peer
    ConnectionClosed,
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "Handshake error: {}", e),
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            BoltError::Authentication(msg) => write!(f, "Authentication error: {}", msg),
            BoltError::Connection(msg) => write!(f, "Connection error: {}", msg),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            BoltError::Timeout => write!(f, "Operation timed out"),
            BoltError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        BoltError::PackStream(err)
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The server answered with an HTTP response instead of a Bolt version
    HttpEndpoint,

    /// The server picked a version outside the proposed repertoire
    UnsupportedVersion { major: u8, minor: u8 },

    /// Invalid handshake data (wrong size, etc.)
    InvalidData(String),

    /// Connection closed during handshake
    ConnectionClosed,

    /// Handshake timeout
    Timeout,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::HttpEndpoint => write!(
                f,
                "The server responded with an HTTP response. Please ensure you're not trying \
                 to connect to the HTTP endpoint. Note that HTTP typically uses port 7474, \
                 while the Bolt protocol uses port 7687."
            ),
            HandshakeError::UnsupportedVersion { major, minor } => {
                write!(f, "Unsupported protocol version {},{}", major, minor)
            }
            HandshakeError::InvalidData(msg) => write!(f, "Invalid handshake data: {}", msg),
            HandshakeError::ConnectionClosed => write!(f, "Connection closed during handshake"),
            HandshakeError::Timeout => write!(f, "Handshake timed out"),
        }
    }
}

impl std::error::Error for HandshakeError {}
