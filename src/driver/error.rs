//! Driver error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::bolt::{BoltError, HandshakeError};

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Driver errors.
///
/// Clonable so a streaming cursor can both store the error that ended the
/// stream and hand it to every later caller.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    /// Malformed URL or unsupported adapter
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dial failure, TLS handshake failure, unexpected EOF
    #[error("Connection error: {0}")]
    Connection(String),

    /// Handshake mismatch, unknown marker, malformed chunk
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// LOGON rejected
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Server FAILURE reply
    #[error("Database error: {code} - {message}")]
    Database { code: String, message: String },

    /// Wrong API usage (Single on 0 or >1 records, closed cursor, ...)
    #[error("Usage error: {0}")]
    Usage(String),

    /// A deadline expired (pool acquisition, chunked read, ...)
    #[error("Timeout: {0}")]
    Timeout(String),

    /// All retry attempts failed
    #[error("max retries ({attempts}) exceeded after {total_delay:?}: {source}")]
    RetryExhausted {
        attempts: u32,
        total_delay: Duration,
        #[source]
        source: Box<DriverError>,
    },

    /// Operation cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for DriverError {
    fn from(err: io::Error) -> Self {
        DriverError::Io(err.to_string())
    }
}

impl DriverError {
    /// Configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Authentication error.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Database error with server code and message.
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Cancellation error.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// True for transient/temporary database errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database { code, message } => {
                let code = code.to_lowercase();
                let msg = message.to_lowercase();
                code.contains("transient")
                    || msg.contains("timeout")
                    || msg.contains("unavailable")
                    || msg.contains("temporarily")
            }
            _ => false,
        }
    }

    /// True for cluster/replication database errors.
    pub fn is_cluster_error(&self) -> bool {
        match self {
            Self::Database { code, message } => {
                let code = code.to_lowercase();
                let msg = message.to_lowercase();
                code.contains("notaleader")
                    || code.contains("readonly")
                    || msg.contains("not a leader")
                    || msg.contains("read-only")
                    || msg.contains("read only")
            }
            _ => false,
        }
    }

    /// True for transaction conflict/deadlock database errors.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Database { code, message } => {
                let code = code.to_lowercase();
                let msg = message.to_lowercase();
                code.contains("deadlock")
                    || code.contains("conflict")
                    || msg.contains("deadlock")
                    || msg.contains("conflicting transactions")
                    || msg.contains("lock timeout")
                    || msg.contains("serialization failure")
            }
            _ => false,
        }
    }

    /// True for authentication/authorization database errors.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Self::Authentication(_) => true,
            Self::Database { code, message } => {
                let code = code.to_lowercase();
                let msg = message.to_lowercase();
                code.contains("security")
                    || code.contains("auth")
                    || msg.contains("authentication")
                    || msg.contains("unauthorized")
            }
            _ => false,
        }
    }

    /// Whether a retry may succeed.
    ///
    /// Transient, cluster, and conflict database errors are retriable, as
    /// are network failures and timeouts. Authentication, usage, config,
    /// and cancellation errors are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Database { .. } => {
                !self.is_auth_error()
                    && (self.is_transient() || self.is_cluster_error() || self.is_conflict())
            }
            Self::Timeout(_) => true,
            Self::Connection(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("connection refused")
                    || msg.contains("connection reset")
                    || msg.contains("broken pipe")
                    || msg.contains("eof")
                    || msg.contains("timeout")
                    || msg.contains("closed")
            }
            Self::Io(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("connection refused")
                    || msg.contains("connection reset")
                    || msg.contains("broken pipe")
                    || msg.contains("eof")
                    || msg.contains("timeout")
                    || msg.contains("timed out")
            }
            _ => false,
        }
    }
}

impl From<BoltError> for DriverError {
    fn from(err: BoltError) -> Self {
        match err {
            BoltError::Io(e) => DriverError::Connection(e.to_string()),
            BoltError::Connection(msg) => DriverError::Connection(msg),
            BoltError::ConnectionClosed => {
                DriverError::Connection("Connection closed by server".to_string())
            }
            BoltError::Handshake(HandshakeError::Timeout) | BoltError::Timeout => {
                DriverError::Timeout("Bolt operation timed out".to_string())
            }
            BoltError::Handshake(e) => DriverError::Protocol(e.to_string()),
            BoltError::PackStream(e) => DriverError::Protocol(e.to_string()),
            BoltError::Protocol(msg) => DriverError::Protocol(msg),
            BoltError::Authentication(msg) => DriverError::Authentication(msg),
            BoltError::MessageTooLarge { size, max } => DriverError::Protocol(format!(
                "Message too large: {} bytes (max: {})",
                size, max
            )),
        }
    }
}
