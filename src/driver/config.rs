//! Driver configuration.

use std::fs;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ClientConfig;

use super::error::{DriverError, DriverResult};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live connections
    pub max_connections: usize,
    /// Idle duration after which a connection re-authenticates on reuse
    pub max_idle_time: Duration,
    /// Maximum lifetime of a connection
    pub connection_lifetime: Duration,
    /// How long to wait for a connection from the pool
    pub acquisition_timeout: Duration,
    /// Probe previously authenticated connections before reuse
    pub liveness_check: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_idle_time: Duration::from_secs(30 * 60),
            connection_lifetime: Duration::from_secs(3600),
            acquisition_timeout: Duration::from_secs(30),
            liveness_check: true,
        }
    }
}

/// TLS configuration.
///
/// The URL scheme decides whether TLS is used and whether certificates are
/// verified; these options supply the material: client certificate and key
/// for mutual TLS, and a CA bundle overriding the system roots.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM file with the client certificate chain (mutual TLS)
    pub client_cert: Option<PathBuf>,
    /// PEM file with the client private key (mutual TLS)
    pub client_key: Option<PathBuf>,
    /// PEM file with root CA certificates; system roots when absent
    pub ca_bundle: Option<PathBuf>,
    /// Expected server name for SNI; derived from the URL host when absent
    pub server_name: Option<String>,
}

impl TlsOptions {
    /// Build a rustls client configuration.
    ///
    /// `verify_cert` is false in `+ssc` mode, which installs a verifier
    /// that accepts any certificate. Minimum protocol version is TLS 1.2.
    pub fn build_client_config(&self, verify_cert: bool) -> DriverResult<ClientConfig> {
        let versions = &[&rustls::version::TLS12, &rustls::version::TLS13];

        let builder = ClientConfig::builder_with_protocol_versions(versions);

        let builder = if verify_cert {
            builder.with_root_certificates(self.root_store()?)
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
        };

        let config = match (&self.client_cert, &self.client_key) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certificates(cert_path)?;
                let key = load_private_key(key_path)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| DriverError::config(format!("invalid client cert/key: {}", e)))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(DriverError::config(
                    "client_cert and client_key must be set together",
                ))
            }
        };

        Ok(config)
    }

    fn root_store(&self) -> DriverResult<rustls::RootCertStore> {
        let mut store = rustls::RootCertStore::empty();

        if let Some(ca_path) = &self.ca_bundle {
            for cert in load_certificates(ca_path)? {
                store.add(cert).map_err(|e| {
                    DriverError::config(format!("failed to add CA certificate: {}", e))
                })?;
            }
        } else {
            for cert in rustls_native_certs::load_native_certs().certs {
                let _ = store.add(cert);
            }
        }

        Ok(store)
    }
}

fn load_certificates(path: &PathBuf) -> DriverResult<Vec<CertificateDer<'static>>> {
    let data = fs::read(path).map_err(|e| {
        DriverError::config(format!("failed to read certificate file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(data.as_slice());
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    certs.map_err(|e| DriverError::config(format!("invalid certificate in {:?}: {}", path, e)))
}

fn load_private_key(path: &PathBuf) -> DriverResult<PrivateKeyDer<'static>> {
    let data = fs::read(path).map_err(|e| {
        DriverError::config(format!("failed to read private key file {:?}: {}", path, e))
    })?;
    let mut reader = BufReader::new(data.as_slice());
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| DriverError::config(format!("invalid private key in {:?}: {}", path, e)))?
        .ok_or_else(|| DriverError::config(format!("no private key found in {:?}", path)))
}

/// Certificate verifier that accepts anything. Installed for `+ssc` URLs.
#[derive(Debug)]
struct NoCertificateVerification;

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Connection pool settings
    pub pool: PoolConfig,
    /// TLS material
    pub tls: TlsOptions,
    /// Records requested per streaming PULL
    pub fetch_size: i64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            tls: TlsOptions::default(),
            fetch_size: 1000,
        }
    }
}

impl DriverConfig {
    /// Start building a configuration.
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }
}

/// Builder for [`DriverConfig`].
#[derive(Debug, Clone, Default)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// Maximum number of live connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.pool.max_connections = n;
        self
    }

    /// Idle duration after which a connection re-authenticates on reuse.
    pub fn max_idle_time(mut self, d: Duration) -> Self {
        self.config.pool.max_idle_time = d;
        self
    }

    /// Maximum lifetime of a connection.
    pub fn connection_lifetime(mut self, d: Duration) -> Self {
        self.config.pool.connection_lifetime = d;
        self
    }

    /// How long to wait for a connection from the pool.
    pub fn acquisition_timeout(mut self, d: Duration) -> Self {
        self.config.pool.acquisition_timeout = d;
        self
    }

    /// Enable or disable the pre-reuse liveness probe.
    pub fn liveness_check(mut self, enabled: bool) -> Self {
        self.config.pool.liveness_check = enabled;
        self
    }

    /// Records requested per streaming PULL.
    pub fn fetch_size(mut self, n: i64) -> Self {
        self.config.fetch_size = n;
        self
    }

    /// PEM paths for mutual TLS.
    pub fn client_certificate(mut self, cert: PathBuf, key: PathBuf) -> Self {
        self.config.tls.client_cert = Some(cert);
        self.config.tls.client_key = Some(key);
        self
    }

    /// PEM path for a CA bundle overriding the system roots.
    pub fn ca_bundle(mut self, path: PathBuf) -> Self {
        self.config.tls.ca_bundle = Some(path);
        self
    }

    /// Expected server name for SNI.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.tls.server_name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> DriverConfig {
        self.config
    }
}
