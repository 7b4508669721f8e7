//! TLS configuration options.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;

/// Decides whether a server certificate is acceptable.
///
/// Receives the end-entity certificate, the intermediates sent by the
/// server and the name being connected to.
pub type TrustCallback =
    Arc<dyn Fn(&CertificateDer<'_>, &[CertificateDer<'_>], &str) -> bool + Send + Sync>;

/// How the server certificate is validated.
#[derive(Clone, Default)]
pub enum TrustMode {
    /// Validate against the Mozilla root store.
    #[default]
    WebPki,
    /// Validate against the certificates in a PEM file.
    TrustedFile(PathBuf),
    /// Validate against the given certificates.
    Certificates(Vec<CertificateDer<'static>>),
    /// Leave the decision to a caller-supplied callback.
    Callback(TrustCallback),
    /// Accept any certificate. Only for development.
    TrustAll,
}

impl fmt::Debug for TrustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebPki => f.write_str("WebPki"),
            Self::TrustedFile(path) => f.debug_tuple("TrustedFile").field(path).finish(),
            Self::Certificates(certs) => f
                .debug_struct("Certificates")
                .field("count", &certs.len())
                .finish(),
            Self::Callback(_) => f.write_str("Callback"),
            Self::TrustAll => f.write_str("TrustAll"),
        }
    }
}

/// TLS configuration for ASE connections.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    /// Certificate validation policy.
    pub trust: TrustMode,

    /// Server hostname for certificate validation.
    ///
    /// If not set, the connection hostname is used.
    pub server_name: Option<String>,

    /// Minimum TLS version to accept.
    pub min_protocol_version: TlsVersion,

    /// Maximum TLS version to accept.
    pub max_protocol_version: TlsVersion,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust: TrustMode::default(),
            server_name: None,
            min_protocol_version: TlsVersion::Tls12,
            max_protocol_version: TlsVersion::Tls13,
        }
    }
}

impl TlsConfig {
    /// Create a new TLS configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust the certificates in a PEM file instead of the Mozilla roots.
    #[must_use]
    pub fn trusted_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust = TrustMode::TrustedFile(path.into());
        self
    }

    /// Trust the given root certificates.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        match &mut self.trust {
            TrustMode::Certificates(certs) => certs.push(cert),
            trust => *trust = TrustMode::Certificates(vec![cert]),
        }
        self
    }

    /// Validate server certificates with a callback.
    #[must_use]
    pub fn trust_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CertificateDer<'_>, &[CertificateDer<'_>], &str) -> bool + Send + Sync + 'static,
    {
        self.trust = TrustMode::Callback(Arc::new(callback));
        self
    }

    /// Accept any server certificate.
    ///
    /// **Warning:** connections are open to man-in-the-middle attacks.
    #[must_use]
    pub fn trust_all(mut self) -> Self {
        self.trust = TrustMode::TrustAll;
        self
    }

    /// Set the server name used for SNI and certificate matching.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Set the minimum TLS version.
    #[must_use]
    pub fn min_protocol_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Set the maximum TLS version.
    #[must_use]
    pub fn max_protocol_version(mut self, version: TlsVersion) -> Self {
        self.max_protocol_version = version;
        self
    }
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = TlsConfig::new()
            .trusted_file("/etc/ase/trusted.txt")
            .server_name("ase01")
            .min_protocol_version(TlsVersion::Tls13);

        assert!(matches!(config.trust, TrustMode::TrustedFile(ref p) if p.ends_with("trusted.txt")));
        assert_eq!(config.server_name.as_deref(), Some("ase01"));
        assert_eq!(config.min_protocol_version, TlsVersion::Tls13);
    }

    #[test]
    fn test_root_certificates_accumulate() {
        let config = TlsConfig::new()
            .add_root_certificate(CertificateDer::from(vec![1u8]))
            .add_root_certificate(CertificateDer::from(vec![2u8]));
        assert!(matches!(config.trust, TrustMode::Certificates(ref c) if c.len() == 2));
    }

    #[test]
    fn test_callback_debug_hides_closure() {
        let config = TlsConfig::new().trust_callback(|_, _, host| host == "ase01");
        assert_eq!(format!("{:?}", config.trust), "Callback");
    }
}
