//! # ase-testing
//!
//! Test infrastructure for ASE driver development.
//!
//! This crate provides a mock TDS 5.0 server that runs in-process, so
//! session, cancellation and pool behaviour can be tested without a real
//! Adaptive Server.
//!
//! ## Features
//!
//! - Mock ASE server with scripted responses
//! - Login acceptance and rejection
//! - Attention acknowledgement, delays, hangs and disconnects
//! - TLS with a generated self-signed certificate
//! - Connection string fixtures pointing at a mock server
//!
//! ## Mock Server Example
//!
//! ```rust,ignore
//! use ase_testing::{MockAseServer, MockResponse, fixtures};
//! use ase_client::{EventSink, Session, CancellationToken};
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockAseServer::builder()
//!         .with_response(
//!             "select id, name from users",
//!             MockResponse::rows(&["id", "name"], vec![vec![1i32.into(), "Alice".into()]]),
//!         )
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let params = fixtures::params(&server, "");
//!     let mut session = Session::connect(params, &CancellationToken::new(), EventSink::new())
//!         .await
//!         .unwrap();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_server;
pub mod tls;

pub use mock_server::{
    LOGIN_FAILED, MockAseServer, MockRequest, MockResponse, MockServerBuilder, MockServerConfig,
    MockServerError,
};
pub use tls::MockTlsIdentity;
