//! # TLS Transport Layer
//!
//! rustls configuration for the TLS listener (base port + 1) and for clients
//! connecting to it.
//!
//! TLS wraps the raw TCP stream only; the XOR cipher, magic negotiation and
//! packet framing all run on top of the decrypted stream exactly as they do
//! for plaintext connections.
//!
//! ## Responsibilities
//! - Load the server certificate chain and private key (PEM, PKCS#8)
//! - Generate self-signed certificates for development and tests
//! - Build client configurations that verify against platform roots, or
//!   accept any certificate when verification is disabled

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig, ServerName};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, info, warn};

use crate::error::{constants, ProtocolError, Result};

/// TLS server configuration
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TlsServerConfig {
    /// Create a new TLS server configuration
    pub fn new<P: AsRef<Path>>(cert_path: P, key_path: P) -> Self {
        Self {
            cert_path: cert_path.as_ref().to_path_buf(),
            key_path: key_path.as_ref().to_path_buf(),
        }
    }

    /// Generate a self-signed certificate for development/testing purposes
    pub fn generate_self_signed<P: AsRef<Path>>(cert_path: P, key_path: P) -> io::Result<Self> {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| io::Error::other(format!("Certificate generation error: {e}")))?;

        let mut cert_file = File::create(&cert_path)?;
        cert_file.write_all(cert.cert.pem().as_bytes())?;

        let mut key_file = File::create(&key_path)?;
        key_file.write_all(cert.signing_key.serialize_pem().as_bytes())?;

        Ok(Self::new(cert_path, key_path))
    }

    fn load_chain(&self) -> Result<Vec<Certificate>> {
        let cert_file = File::open(&self.cert_path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open cert file: {e}")))?;
        let chain = certs(&mut BufReader::new(cert_file))
            .map_err(|_| ProtocolError::ConfigError("Failed to parse certificate".into()))?;
        if chain.is_empty() {
            return Err(ProtocolError::ConfigError(
                "No certificates found in cert file".into(),
            ));
        }
        Ok(chain.into_iter().map(Certificate).collect())
    }

    fn load_key(&self) -> Result<PrivateKey> {
        let key_file = File::open(&self.key_path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open key file: {e}")))?;
        let mut keys = pkcs8_private_keys(&mut BufReader::new(key_file))
            .map_err(|_| ProtocolError::ConfigError("Failed to parse private key".into()))?;
        if keys.is_empty() {
            return Err(ProtocolError::ConfigError(
                constants::ERR_MISSING_PRIVATE_KEY.into(),
            ));
        }
        Ok(PrivateKey(keys.swap_remove(0)))
    }

    /// SHA-256 fingerprint of the leaf certificate, colon-separated hex.
    ///
    /// Stands in for the certificate subject in operator-facing logs.
    pub fn fingerprint(&self) -> Result<String> {
        let chain = self.load_chain()?;
        Ok(format_fingerprint(&certificate_hash(&chain[0])))
    }

    /// Load the TLS configuration from files
    pub fn load_server_config(&self) -> Result<ServerConfig> {
        let chain = self.load_chain()?;
        let key = self.load_key()?;
        let fingerprint = format_fingerprint(&certificate_hash(&chain[0]));

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| ProtocolError::ConfigError(format!("TLS error: {e}")))?;

        info!(%fingerprint, "Loaded server certificate");
        Ok(config)
    }

    pub fn acceptor(&self) -> Result<TlsAcceptor> {
        Ok(TlsAcceptor::from(Arc::new(self.load_server_config()?)))
    }
}

/// TLS Client Configuration
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    server_name: String,
    insecure: bool,
}

impl TlsClientConfig {
    /// Create a new TLS client configuration
    pub fn new<S: Into<String>>(server_name: S) -> Self {
        Self {
            server_name: server_name.into(),
            insecure: false,
        }
    }

    /// Skip certificate verification entirely.
    ///
    /// Only meant for self-signed development servers.
    pub fn insecure(mut self) -> Self {
        warn!("Certificate verification is disabled");
        self.insecure = true;
        self
    }

    /// Load the TLS client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let builder = ClientConfig::builder().with_safe_defaults();

        if self.insecure {
            struct AcceptAnyServerCert;

            impl rustls::client::ServerCertVerifier for AcceptAnyServerCert {
                fn verify_server_cert(
                    &self,
                    _end_entity: &Certificate,
                    _intermediates: &[Certificate],
                    _server_name: &ServerName,
                    _scts: &mut dyn Iterator<Item = &[u8]>,
                    _ocsp_response: &[u8],
                    _now: std::time::SystemTime,
                ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
                    Ok(rustls::client::ServerCertVerified::assertion())
                }
            }

            return Ok(builder
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth());
        }

        let mut root_store = RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs()
            .map_err(|e| ProtocolError::TlsError(format!("Failed to load native certs: {e}")))?;
        let (mut added, mut skipped) = (0usize, 0usize);
        for cert in native_certs {
            match root_store.add(&Certificate(cert.0)) {
                Ok(()) => added += 1,
                Err(_) => skipped += 1,
            }
        }
        debug!(added, skipped, "Loaded platform root certificates");

        Ok(builder
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| ProtocolError::TlsError("Invalid server name".into()))
    }

    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(Arc::new(self.load_client_config()?)))
    }
}

/// Calculate SHA-256 hash for a certificate
pub fn certificate_hash(cert: &Certificate) -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(&cert.0);
    hasher.finalize().to_vec()
}

fn format_fingerprint(hash: &[u8]) -> String {
    hash.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_loads() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        let config = TlsServerConfig::generate_self_signed(&cert, &key).unwrap();
        assert!(config.load_server_config().is_ok());

        let fp = config.fingerprint().unwrap();
        assert_eq!(fp.split(':').count(), 32);
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        TlsServerConfig::generate_self_signed(&cert, &key).unwrap();
        std::fs::write(&key, "").unwrap();

        let err = TlsServerConfig::new(&cert, &key)
            .load_server_config()
            .unwrap_err();
        match err {
            ProtocolError::ConfigError(msg) => {
                assert_eq!(msg, constants::ERR_MISSING_PRIVATE_KEY)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_cert_file() {
        let config = TlsServerConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(
            config.load_server_config(),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_insecure_client_config_builds() {
        let config = TlsClientConfig::new("localhost").insecure();
        assert!(config.load_client_config().is_ok());
        assert!(config.server_name().is_ok());
    }
}
