//! Self-signed TLS identity for the mock server.
//!
//! The certificate covers `localhost` and `127.0.0.1`, so clients pointed
//! at a mock server can validate it by trusting the certificate itself.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_rustls::TlsAcceptor;

use crate::mock_server::{MockServerError, Result};

/// Names the generated certificate is valid for.
pub const TLS_SUBJECT_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Certificate, key and acceptor for a TLS mock server.
#[derive(Clone)]
pub struct MockTlsIdentity {
    certificate: CertificateDer<'static>,
    certificate_pem: String,
    acceptor: TlsAcceptor,
}

impl MockTlsIdentity {
    /// Generate a fresh self-signed identity.
    pub fn generate() -> Result<Self> {
        let key = rcgen::KeyPair::generate().map_err(tls_error)?;
        let params = rcgen::CertificateParams::new(
            TLS_SUBJECT_NAMES
                .iter()
                .map(|name| (*name).to_string())
                .collect::<Vec<_>>(),
        )
        .map_err(tls_error)?;
        let cert = params.self_signed(&key).map_err(tls_error)?;

        let certificate = cert.der().clone();
        let private_key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(tls_error)?
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], private_key)
            .map_err(tls_error)?;

        Ok(Self {
            certificate,
            certificate_pem: cert.pem(),
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// DER encoding of the server certificate.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// PEM encoding of the server certificate.
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// Write the certificate as a PEM trusted file.
    pub async fn write_trusted_file(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.certificate_pem.as_bytes()).await?;
        Ok(())
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

impl fmt::Debug for MockTlsIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTlsIdentity")
            .field("certificate_len", &self.certificate.len())
            .finish_non_exhaustive()
    }
}

fn tls_error(e: impl fmt::Display) -> MockServerError {
    MockServerError::Tls(e.to_string())
}
