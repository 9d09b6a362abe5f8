//! TLS and mTLS configuration for the gRPC listener.
//!
//! Client certificates are requested but optional: callers without one
//! authenticate through the `authorization` header instead. Certificates
//! that are presented must chain to the configured client CA.

use anyhow::{Context, Result};
use std::path::Path;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};
use x509_parser::prelude::{parse_x509_certificate, X509Certificate};

/// TLS configuration for a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Certificate chain path (PEM).
    pub cert_chain_path: String,
    /// Private key path (PEM).
    pub key_path: String,
    /// Client CA path for verifying client certificates.
    pub client_ca_path: Option<String>,
}

impl TlsConfig {
    /// Create a new TLS configuration.
    pub fn new(cert_chain_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            cert_chain_path: cert_chain_path.into(),
            key_path: key_path.into(),
            client_ca_path: None,
        }
    }

    /// Verify client certificates against the given CA bundle.
    pub fn with_client_ca(mut self, client_ca_path: impl Into<String>) -> Self {
        self.client_ca_path = Some(client_ca_path.into());
        self
    }

    /// Validate that TLS files exist.
    pub fn validate(&self) -> Result<()> {
        if !Path::new(&self.cert_chain_path).exists() {
            anyhow::bail!("TLS certificate chain not found: {}", self.cert_chain_path);
        }
        if !Path::new(&self.key_path).exists() {
            anyhow::bail!("TLS private key not found: {}", self.key_path);
        }
        if let Some(ref ca_path) = self.client_ca_path {
            if !Path::new(ca_path).exists() {
                anyhow::bail!("TLS client CA not found: {}", ca_path);
            }
        }
        Ok(())
    }
}

/// Loaded server identity.
#[derive(Debug, Clone)]
pub struct TlsIdentity {
    /// Certificate chain in PEM format.
    pub cert_chain_pem: Vec<u8>,
    /// Private key in PEM format.
    pub key_pem: Vec<u8>,
    /// Common name of the leaf certificate.
    pub common_name: Option<String>,
}

impl TlsIdentity {
    /// Load a TLS identity from file paths.
    pub fn load(cert_chain_path: &str, key_path: &str) -> Result<Self> {
        let cert_chain_pem = std::fs::read(cert_chain_path)
            .with_context(|| format!("failed to read cert chain: {}", cert_chain_path))?;
        let key_pem = std::fs::read(key_path)
            .with_context(|| format!("failed to read private key: {}", key_path))?;
        let common_name = pem_common_name(&cert_chain_pem);

        Ok(Self {
            cert_chain_pem,
            key_pem,
            common_name,
        })
    }
}

/// Subject common name of a DER certificate.
pub fn leaf_common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = parse_x509_certificate(der).ok()?;
    common_name(&cert)
}

/// Subject common name of the first certificate in a PEM bundle.
pub fn pem_common_name(pem: &[u8]) -> Option<String> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem).ok()?;
    let cert = pem.parse_x509().ok()?;
    common_name(&cert)
}

fn common_name(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .filter(|cn| !cn.is_empty())
        .map(str::to_string)
}

/// Build the tonic server TLS configuration.
pub fn server_tls_config(config: &TlsConfig) -> Result<ServerTlsConfig> {
    config.validate()?;
    let identity = TlsIdentity::load(&config.cert_chain_path, &config.key_path)?;
    tracing::info!(
        cert = %config.cert_chain_path,
        common_name = identity.common_name.as_deref().unwrap_or("<none>"),
        "loaded server identity"
    );

    let mut tls = ServerTlsConfig::new().identity(Identity::from_pem(
        identity.cert_chain_pem,
        identity.key_pem,
    ));

    if let Some(ref ca_path) = config.client_ca_path {
        let ca = std::fs::read(ca_path)
            .with_context(|| format!("failed to read client CA: {}", ca_path))?;
        tls = tls
            .client_ca_root(Certificate::from_pem(ca))
            .client_auth_optional(true);
    }

    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("tls.crt");
        let key = dir.path().join("tls.key");

        let config = TlsConfig::new(cert.to_string_lossy(), key.to_string_lossy());
        assert!(config.validate().is_err());

        std::fs::write(&cert, b"cert").unwrap();
        std::fs::write(&key, b"key").unwrap();
        assert!(config.validate().is_ok());

        let config = config.with_client_ca(dir.path().join("ca.crt").to_string_lossy());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client CA"));
    }

    #[test]
    fn test_common_name_of_garbage() {
        assert_eq!(leaf_common_name(b"not der"), None);
        assert_eq!(pem_common_name(b"not pem"), None);
    }
}
