//! Certificate loading for mutual TLS
//!
//! Resolves the CA bundle, client certificate and private key named in the
//! `[mqtt]` section. File paths take precedence over inline PEM strings. All
//! material is parsed here, and the client key must belong to the client
//! certificate, so that a bad setup fails before any network I/O.

use crate::config::MqttSection;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// PEM-encoded material handed to the transport
#[derive(Clone, PartialEq)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

// Keeps key bytes out of logs
impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("client_cert_bytes", &self.client_cert.len())
            .field("client_key", &"<redacted>")
            .finish()
    }
}

/// Certificate loading errors
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to read {what} from {path}")]
    Read {
        what: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("mTLS is enabled but no CA path is configured")]
    MissingCa,
    #[error("Failed loading client certificate: {0} is missing")]
    MissingClientCertificate(&'static str),
    #[error("Invalid PEM in {what}: {reason}")]
    InvalidPem { what: &'static str, reason: String },
    #[error("Client certificate and private key are mismatched: {0}")]
    Mismatched(String),
}

/// Load TLS material when mTLS is enabled; `Ok(None)` otherwise
pub fn load_certificates(config: &MqttSection) -> Result<Option<TlsMaterial>, CertificateError> {
    if !config.mtls {
        debug!("mTLS disabled, skipping certificate loading");
        return Ok(None);
    }

    if config.ca_path.is_empty() {
        return Err(CertificateError::MissingCa);
    }
    let ca = read_file("CA bundle", &config.ca_path)?;

    let client_cert = resolve_material(
        "client certificate",
        &config.client_cert_path,
        &config.client_cert,
    )?;
    let client_key = resolve_material(
        "client private key",
        &config.client_priv_key_path,
        &config.client_cert_key,
    )?;

    let (client_cert, client_key) = match (client_cert, client_key) {
        (Some(cert), Some(key)) => (cert, key),
        (None, _) => return Err(CertificateError::MissingClientCertificate("client certificate")),
        (_, None) => return Err(CertificateError::MissingClientCertificate("client private key")),
    };

    let ca_certs = parse_certificates("CA bundle", &ca)?;
    let chain = parse_certificates("client certificate", &client_cert)?;
    let (ca_count, chain_len) = (ca_certs.len(), chain.len());
    verify_client_identity(ca_certs, chain, parse_private_key(&client_key)?)?;

    info!(
        ca_certificates = ca_count,
        client_chain_length = chain_len,
        "Loaded mTLS certificate material"
    );

    Ok(Some(TlsMaterial {
        ca,
        client_cert,
        client_key,
    }))
}

/// Path wins over inline content; empty results count as missing
fn resolve_material(
    what: &'static str,
    path: &str,
    inline: &str,
) -> Result<Option<Vec<u8>>, CertificateError> {
    let mut bytes = Vec::new();
    if !path.is_empty() {
        bytes = read_file(what, path)?;
    }
    if bytes.is_empty() && !inline.is_empty() {
        bytes = inline.as_bytes().to_vec();
    }
    Ok(if bytes.is_empty() { None } else { Some(bytes) })
}

fn read_file(what: &'static str, path: &str) -> Result<Vec<u8>, CertificateError> {
    std::fs::read(Path::new(path)).map_err(|source| CertificateError::Read {
        what,
        path: path.to_string(),
        source,
    })
}

fn parse_certificates(
    what: &'static str,
    pem: &[u8],
) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateError::InvalidPem {
            what,
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CertificateError::InvalidPem {
            what,
            reason: "no certificates found".to_string(),
        });
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, CertificateError> {
    let mut reader = pem;
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(CertificateError::InvalidPem {
            what: "client private key",
            reason: "no private key found".to_string(),
        }),
        Err(e) => Err(CertificateError::InvalidPem {
            what: "client private key",
            reason: e.to_string(),
        }),
    }
}

/// Build the client-side TLS config once to check the CA parses and the key
/// belongs to the leaf certificate
fn verify_client_identity(
    ca: Vec<CertificateDer<'static>>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<(), CertificateError> {
    let mut roots = RootCertStore::empty();
    for cert in ca {
        roots
            .add(cert)
            .map_err(|e| CertificateError::InvalidPem {
                what: "CA bundle",
                reason: e.to_string(),
            })?;
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| CertificateError::Mismatched(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| CertificateError::Mismatched(e.to_string()))?;

    debug!("Client private key matches certificate");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CA_PEM: &str = include_str!("../tests/fixtures/ca.pem");
    const CERT_PEM: &str = include_str!("../tests/fixtures/client.pem");
    const KEY_PEM: &str = include_str!("../tests/fixtures/client.key");

    fn pem_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn mtls_section(ca: &NamedTempFile) -> MqttSection {
        MqttSection {
            mtls: true,
            ca_path: ca.path().to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_mtls_loads_nothing() {
        let section = MqttSection::default();
        assert!(load_certificates(&section).unwrap().is_none());
    }

    #[test]
    fn test_inline_material_is_used_without_paths() {
        let ca = pem_file(CA_PEM);
        let mut section = mtls_section(&ca);
        section.client_cert = CERT_PEM.to_string();
        section.client_cert_key = KEY_PEM.to_string();

        let material = load_certificates(&section).unwrap().unwrap();
        assert_eq!(material.client_cert, CERT_PEM.as_bytes());
        assert_eq!(material.client_key, KEY_PEM.as_bytes());
    }

    #[test]
    fn test_path_takes_precedence_over_inline() {
        let ca = pem_file(CA_PEM);
        let cert_file = pem_file(CERT_PEM);
        let mut section = mtls_section(&ca);
        section.client_cert_path = cert_file.path().to_string_lossy().into_owned();
        section.client_cert = "inline certificate that is never read".to_string();
        section.client_cert_key = KEY_PEM.to_string();

        let material = load_certificates(&section).unwrap().unwrap();
        assert_eq!(material.client_cert, CERT_PEM.as_bytes());
    }

    #[test]
    fn test_missing_key_fails() {
        let ca = pem_file(CA_PEM);
        let mut section = mtls_section(&ca);
        section.client_cert = CERT_PEM.to_string();

        let result = load_certificates(&section);
        assert!(matches!(
            result,
            Err(CertificateError::MissingClientCertificate("client private key"))
        ));
    }

    #[test]
    fn test_missing_ca_path_fails() {
        let section = MqttSection {
            mtls: true,
            client_cert: CERT_PEM.to_string(),
            client_cert_key: KEY_PEM.to_string(),
            ..Default::default()
        };

        assert!(matches!(
            load_certificates(&section),
            Err(CertificateError::MissingCa)
        ));
    }

    #[test]
    fn test_unreadable_ca_fails() {
        let section = MqttSection {
            mtls: true,
            ca_path: "/nonexistent/ca.crt".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            load_certificates(&section),
            Err(CertificateError::Read { what: "CA bundle", .. })
        ));
    }

    #[test]
    fn test_garbage_certificate_fails() {
        let ca = pem_file("not a certificate");
        let mut section = mtls_section(&ca);
        section.client_cert = CERT_PEM.to_string();
        section.client_cert_key = KEY_PEM.to_string();

        assert!(matches!(
            load_certificates(&section),
            Err(CertificateError::InvalidPem {
                what: "CA bundle",
                ..
            })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let material = TlsMaterial {
            ca: CA_PEM.as_bytes().to_vec(),
            client_cert: CERT_PEM.as_bytes().to_vec(),
            client_key: KEY_PEM.as_bytes().to_vec(),
        };
        let rendered = format!("{material:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
