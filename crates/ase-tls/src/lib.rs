//! # ase-tls
//!
//! TLS layer for Sybase/SAP ASE connections.
//!
//! ASE servers configured for SSL expect the TLS handshake immediately after
//! the TCP connection is established; every TDS byte, the login packet
//! included, travels inside the TLS session.
//!
//! ```text
//! TCP Connect → TLS Handshake → Login (encrypted) → requests
//! ```
//!
//! ## Trust
//!
//! The server certificate is validated against one of:
//!
//! - the Mozilla root store (`webpki-roots`), the default;
//! - a PEM "trusted file" such as the `trusted.txt` shipped with ASE;
//! - a caller-supplied callback;
//! - nothing at all (`trust_all`), which logs a warning.
//!
//! ```rust,ignore
//! use ase_tls::{TlsConfig, TlsConnector};
//!
//! let connector = TlsConnector::new(TlsConfig::new().trusted_file("trusted.txt"))?;
//! let tls_stream = connector.connect(tcp_stream, "ase01.example.com").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;

pub use config::{TlsConfig, TlsVersion, TrustCallback, TrustMode};
pub use connector::{TlsConnector, load_trusted_file};
pub use error::TlsError;

// Re-export tokio-rustls stream type for convenience
pub use tokio_rustls::client::TlsStream;
