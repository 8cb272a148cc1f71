//! Client-side Bolt connection.
//!
//! Owns the socket (plain TCP or TLS), performs the handshake and
//! HELLO/LOGON exchange, and frames messages through [`BoltCodec`]. Every
//! chunked read runs under a read deadline.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::bolt::handshake::{
    build_handshake, parse_handshake_response, HANDSHAKE_RESPONSE_SIZE,
};
use crate::bolt::{
    BoltCodec, BoltError, BoltRequest, BoltResponse, BoltResult, HelloMessage, LogonMessage,
    SuccessMessage,
};

/// Default deadline for handshake and chunked reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS material needed to wrap a dialed socket.
pub struct TlsContext {
    /// Session configuration (verification mode baked in)
    pub connector: TlsConnector,
    /// Server name for SNI and certificate checks
    pub server_name: ServerName<'static>,
}

impl TlsContext {
    /// Build a TLS context from a client config and a host name.
    pub fn new(config: Arc<rustls::ClientConfig>, host: &str) -> BoltResult<Self> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| BoltError::Connection(format!("Invalid server name: {}", host)))?;
        Ok(Self {
            connector: TlsConnector::from(config),
            server_name,
        })
    }
}

enum BoltStream {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl BoltStream {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            BoltStream::Tcp(s) => s.write_all(buf).await,
            BoltStream::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            BoltStream::Tcp(s) => s.flush().await,
            BoltStream::Tls(s) => s.flush().await,
        }
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            BoltStream::Tcp(s) => s.read_buf(buf).await,
            BoltStream::Tls(s) => s.read_buf(buf).await,
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            BoltStream::Tcp(s) => s.read_exact(buf).await.map(|_| ()),
            BoltStream::Tls(s) => s.read_exact(buf).await.map(|_| ()),
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            BoltStream::Tcp(s) => s.shutdown().await,
            BoltStream::Tls(s) => s.shutdown().await,
        }
    }
}

/// A framed Bolt connection.
pub struct BoltConnection {
    stream: BoltStream,
    codec: BoltCodec,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    bolt_version: Option<(u8, u8)>,
    address: String,
    read_timeout: Duration,
}

impl BoltConnection {
    /// Dial a server, optionally wrapping the socket in TLS.
    pub async fn connect(address: &str, tls: Option<&TlsContext>) -> BoltResult<Self> {
        let tcp = TcpStream::connect(address).await.map_err(|e| {
            BoltError::Connection(format!("Failed to connect to {}: {}", address, e))
        })?;
        tcp.set_nodelay(true).ok();

        let stream = match tls {
            Some(ctx) => {
                let tls_stream = ctx
                    .connector
                    .connect(ctx.server_name.clone(), tcp)
                    .await
                    .map_err(|e| {
                        BoltError::Connection(format!("TLS handshake with {} failed: {}", address, e))
                    })?;
                debug!(address, "TLS session established");
                BoltStream::Tls(Box::new(tls_stream))
            }
            None => BoltStream::Tcp(tcp),
        };

        Ok(Self {
            stream,
            codec: BoltCodec::new(),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
            bolt_version: None,
            address: address.to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Perform the Bolt version negotiation.
    pub async fn handshake(&mut self) -> BoltResult<(u8, u8)> {
        let request = build_handshake();
        self.stream
            .write_all(&request)
            .await
            .map_err(|e| BoltError::Connection(format!("Handshake write failed: {}", e)))?;

        let mut response = [0u8; HANDSHAKE_RESPONSE_SIZE];
        tokio::time::timeout(self.read_timeout, self.stream.read_exact(&mut response))
            .await
            .map_err(|_| BoltError::Timeout)?
            .map_err(|e| BoltError::Connection(format!("Handshake read failed: {}", e)))?;

        let version = parse_handshake_response(response)?;
        debug!(address = %self.address, major = version.0, minor = version.1, "Bolt version negotiated");
        self.bolt_version = Some(version);
        Ok(version)
    }

    /// Send HELLO and expect SUCCESS. Any other reply is fatal for the
    /// connection.
    pub async fn hello(&mut self, user_agent: &str) -> BoltResult<SuccessMessage> {
        let hello = HelloMessage::new(user_agent);
        match self.request(BoltRequest::Hello(hello)).await? {
            BoltResponse::Success(success) => {
                debug!(address = %self.address, server = ?success.server(), "HELLO accepted");
                Ok(success)
            }
            BoltResponse::Failure(failure) => Err(BoltError::Connection(format!(
                "HELLO rejected: {}",
                failure
            ))),
            other => Err(BoltError::Protocol(format!(
                "Unexpected response to HELLO: {}",
                other.name()
            ))),
        }
    }

    /// Send LOGON with basic credentials. FAILURE surfaces as an
    /// authentication error.
    pub async fn logon(&mut self, principal: &str, credentials: &str) -> BoltResult<()> {
        let logon = LogonMessage::basic(principal, credentials);
        match self.request(BoltRequest::Logon(logon)).await? {
            BoltResponse::Success(_) => Ok(()),
            BoltResponse::Failure(failure) => Err(BoltError::Authentication(failure.message)),
            other => Err(BoltError::Protocol(format!(
                "Unexpected response to LOGON: {}",
                other.name()
            ))),
        }
    }

    /// Send RESET and expect SUCCESS.
    pub async fn reset(&mut self) -> BoltResult<()> {
        match self.request(BoltRequest::Reset).await? {
            BoltResponse::Success(_) => Ok(()),
            BoltResponse::Failure(failure) => {
                Err(BoltError::Protocol(format!("RESET rejected: {}", failure)))
            }
            other => Err(BoltError::Protocol(format!(
                "Unexpected response to RESET: {}",
                other.name()
            ))),
        }
    }

    /// Send a request message.
    pub async fn send(&mut self, request: BoltRequest) -> BoltResult<()> {
        self.write_buffer.clear();
        let name = request.name();
        self.codec.encode(request, &mut self.write_buffer)?;

        self.stream
            .write_all(&self.write_buffer)
            .await
            .map_err(|e| BoltError::Connection(format!("Send failed: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| BoltError::Connection(format!("Flush failed: {}", e)))?;

        debug!(address = %self.address, message = name, "request sent");
        Ok(())
    }

    /// Receive one response message under the read deadline.
    pub async fn recv(&mut self) -> BoltResult<BoltResponse> {
        loop {
            if let Some(response) = self.codec.decode(&mut self.read_buffer)? {
                return Ok(response);
            }

            let n = tokio::time::timeout(
                self.read_timeout,
                self.stream.read_buf(&mut self.read_buffer),
            )
            .await
            .map_err(|_| BoltError::Timeout)?
            .map_err(|e| BoltError::Connection(format!("Read failed: {}", e)))?;

            if n == 0 {
                return Err(BoltError::ConnectionClosed);
            }
        }
    }

    /// Send a request and read a single reply.
    pub async fn request(&mut self, request: BoltRequest) -> BoltResult<BoltResponse> {
        self.send(request).await?;
        self.recv().await
    }

    /// Probe whether the socket is still usable.
    ///
    /// A 1 ms read that times out means the connection is alive with no
    /// data pending. EOF or a transport error means it is dead. Any bytes
    /// that do arrive land in the read buffer, so nothing is lost.
    pub async fn is_alive(&mut self) -> bool {
        match tokio::time::timeout(
            Duration::from_millis(1),
            self.stream.read_buf(&mut self.read_buffer),
        )
        .await
        {
            Err(_) => true,       // no data pending
            Ok(Ok(0)) => false,   // EOF
            Ok(Ok(_)) => true,    // buffered for the next recv
            Ok(Err(_)) => false,  // reset, broken pipe, ...
        }
    }

    /// Say GOODBYE and shut the socket down.
    pub async fn close(&mut self) -> BoltResult<()> {
        let _ = self.send(BoltRequest::Goodbye).await;
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// The negotiated protocol version, if the handshake completed.
    pub fn bolt_version(&self) -> Option<(u8, u8)> {
        self.bolt_version
    }

    /// The server address this connection dialed.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Override the read deadline (tests use short ones).
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("address", &self.address)
            .field("bolt_version", &self.bolt_version)
            .finish()
    }
}
