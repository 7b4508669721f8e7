//! TLS connector for establishing encrypted connections.
//!
//! ASE negotiates TLS directly on the TCP socket, before the login packet.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{TlsConfig, TlsVersion, TrustCallback, TrustMode};
use crate::error::TlsError;

/// Accepts any server certificate.
///
/// Signatures are still checked so the handshake itself stays sound.
#[derive(Debug)]
struct TrustAllVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Hands the certificate decision to a caller-supplied callback.
struct CallbackVerifier {
    callback: TrustCallback,
    provider: Arc<CryptoProvider>,
}

impl std::fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for CallbackVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let name = server_name.to_str();
        if (self.callback)(end_entity, intermediates, &name) {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::debug!(server_name = %name, "server certificate rejected by trust callback");
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Read every PEM certificate in `path`.
pub fn load_trusted_file(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::TrustedFile {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::TrustedFile {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::EmptyTrustedFile(path.to_path_buf()));
    }
    tracing::debug!(path = %path.display(), certificates = certs.len(), "loaded trusted file");
    Ok(certs)
}

/// TLS connector for ASE connections.
///
/// Builds the rustls client configuration once; each [`TlsConnector::connect`]
/// wraps a freshly connected TCP stream.
#[derive(Clone)]
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector with the given configuration.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = Self::build_client_config(&config)?;
        let inner = TokioTlsConnector::from(Arc::new(client_config));

        Ok(Self { config, inner })
    }

    fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = Self::select_versions(config);
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&versions)?;

        let client_config = match &config.trust {
            TrustMode::TrustAll => {
                tracing::warn!(
                    "server certificate validation is disabled; \
                     connections are open to man-in-the-middle attacks"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(TrustAllVerifier { provider }))
                    .with_no_client_auth()
            }
            TrustMode::Callback(callback) => builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(CallbackVerifier {
                    callback: Arc::clone(callback),
                    provider,
                }))
                .with_no_client_auth(),
            trust => builder
                .with_root_certificates(Self::build_root_store(trust)?)
                .with_no_client_auth(),
        };

        Ok(client_config)
    }

    fn build_root_store(trust: &TrustMode) -> Result<RootCertStore, TlsError> {
        let mut root_store = RootCertStore::empty();

        let certs = match trust {
            TrustMode::TrustedFile(path) => load_trusted_file(path)?,
            TrustMode::Certificates(certs) => certs.clone(),
            _ => {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                return Ok(root_store);
            }
        };

        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        }
        Ok(root_store)
    }

    fn select_versions(config: &TlsConfig) -> Vec<&'static rustls::SupportedProtocolVersion> {
        let mut versions = Vec::new();

        if config.min_protocol_version <= TlsVersion::Tls12
            && config.max_protocol_version >= TlsVersion::Tls12
        {
            versions.push(&rustls::version::TLS12);
        }

        if config.min_protocol_version <= TlsVersion::Tls13
            && config.max_protocol_version >= TlsVersion::Tls13
        {
            versions.push(&rustls::version::TLS13);
        }

        if versions.is_empty() {
            versions.push(&rustls::version::TLS12);
        }

        versions
    }

    /// Perform the TLS handshake over a connected stream.
    ///
    /// `server_name` is used for SNI and certificate matching unless the
    /// configuration overrides it.
    pub async fn connect<S>(&self, stream: S, server_name: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.config.server_name.as_deref().unwrap_or(server_name);

        let dns_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;

        tracing::debug!(server_name = %server_name, "performing TLS handshake");

        let tls_stream = self
            .inner
            .connect(dns_name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        tracing::debug!("TLS handshake completed");

        Ok(tls_stream)
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert!(TlsConnector::new(TlsConfig::default()).is_ok());
    }

    #[test]
    fn test_trust_all() {
        let connector = TlsConnector::new(TlsConfig::new().trust_all()).unwrap();
        assert!(matches!(connector.config().trust, TrustMode::TrustAll));
    }

    #[test]
    fn test_missing_trusted_file() {
        let config = TlsConfig::new().trusted_file("/nonexistent/ase/trusted.txt");
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::TrustedFile { .. })
        ));
    }

    #[test]
    fn test_trusted_file_without_certificates() {
        let path = std::env::temp_dir().join(format!("ase-tls-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a certificate\n").unwrap();

        let result = load_trusted_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(result, Err(TlsError::EmptyTrustedFile(_))));
    }

    #[test]
    fn test_version_selection() {
        let only13 = TlsConfig::new().min_protocol_version(TlsVersion::Tls13);
        assert_eq!(TlsConnector::select_versions(&only13).len(), 1);

        let inverted = TlsConfig::new()
            .min_protocol_version(TlsVersion::Tls13)
            .max_protocol_version(TlsVersion::Tls12);
        assert_eq!(TlsConnector::select_versions(&inverted).len(), 1);

        assert_eq!(TlsConnector::select_versions(&TlsConfig::new()).len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_server_name() {
        let connector = TlsConnector::new(TlsConfig::new().trust_all()).unwrap();
        let (client, _server) = tokio::io::duplex(64);
        assert!(matches!(
            connector.connect(client, "bad name with spaces").await,
            Err(TlsError::InvalidServerName(_))
        ));
    }
}
