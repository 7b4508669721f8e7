//! TLS-related error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while setting up or running TLS.
#[derive(Debug, Error)]
pub enum TlsError {
    /// TLS handshake failed, including certificate rejection.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// The host name cannot be used for SNI or certificate matching.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// A trusted certificate could not be parsed or added.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The trusted file could not be read.
    #[error("cannot read trusted file {path}: {source}")]
    TrustedFile {
        /// Path from the connection parameters.
        path: PathBuf,
        /// Underlying read error.
        #[source]
        source: std::io::Error,
    },

    /// The trusted file holds no certificates.
    #[error("trusted file {0} contains no certificates")]
    EmptyTrustedFile(PathBuf),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Rustls error.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),

    /// IO error during TLS operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
