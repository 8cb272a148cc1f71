//! Bolt wire protocol implementation.
//!
//! This module contains everything below the driver: the PackStream codec,
//! typed protocol messages, chunked framing, and the client handshake.
//!
//! ```text
//! Driver
//!   └── BoltConnection (TCP/TLS + framing)
//!         ├── handshake (version negotiation)
//!         ├── BoltCodec (chunked framing)
//!         │     └── packstream (value codec)
//!         └── message (typed requests/responses)
//! ```

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::{BoltCodec, MAX_CHUNK_SIZE};
pub use error::{BoltError, BoltResult, HandshakeError};
pub use handshake::{build_handshake, parse_handshake_response, BOLT_MAGIC, SUPPORTED_VERSIONS};
pub use message::{
    Adapter, BeginMessage, BoltRequest, BoltResponse, DiscardMessage, FailureMessage,
    HelloMessage, LogonMessage, PullMessage, RecordMessage, RouteMessage, RunMessage,
    SuccessMessage,
};
pub use packstream::{PackStreamError, Structure, Value};
