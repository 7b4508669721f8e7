//! TLS sessions against the mock server.
//!
//! ```bash
//! cargo test -p ase-testing --test tls
//! ```

#![allow(clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ase_client::{CancellationToken, ConnectionParameters, Error, EventSink, Session, SqlValue};
use ase_testing::{MockAseServer, MockTlsIdentity, fixtures};
use ase_tls::TlsConfig;
use parking_lot::Mutex;

async fn start_tls() -> MockAseServer {
    fixtures::init_tracing();
    MockAseServer::builder()
        .with_tls()
        .expect("certificate should generate")
        .build()
        .await
        .expect("mock server should start")
}

fn trusted_file_path(server: &MockAseServer, tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "ase-trusted-{}-{}-{tag}.pem",
        std::process::id(),
        server.port()
    ))
}

async fn connect(params: Arc<ConnectionParameters>) -> Result<Session, Error> {
    tokio::time::timeout(
        Duration::from_secs(10),
        Session::connect(params, &CancellationToken::new(), EventSink::new()),
    )
    .await
    .expect("handshake should finish promptly")
}

// =============================================================================
// Trusted file
// =============================================================================

#[tokio::test]
async fn test_login_and_query_over_tls_with_trusted_file() {
    let server = start_tls().await;
    let path = trusted_file_path(&server, "own");
    server
        .tls_identity()
        .expect("server uses TLS")
        .write_trusted_file(&path)
        .await
        .expect("trusted file should be written");

    let params = fixtures::params(
        &server,
        &format!("Encryption=true;TrustedFile={}", path.display()),
    );
    let mut session = connect(params).await.expect("TLS login should succeed");
    assert!(session.is_encrypted());

    let value = session.execute_scalar("select 1", &[]).await.expect("query");
    assert_eq!(value, Some(SqlValue::Int(1)));
    session.close().await.expect("close");

    let _ = tokio::fs::remove_file(&path).await;
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_trusted_file_with_other_certificate_is_rejected() {
    let server = start_tls().await;
    let path = trusted_file_path(&server, "other");
    MockTlsIdentity::generate()
        .expect("certificate should generate")
        .write_trusted_file(&path)
        .await
        .expect("trusted file should be written");

    let params = fixtures::params(
        &server,
        &format!("Encryption=true;TrustedFile={}", path.display()),
    );
    let err = connect(params).await.expect_err("certificate is not trusted");
    let _ = tokio::fs::remove_file(&path).await;

    assert!(matches!(err, Error::Tls(_)), "unexpected error: {err}");
    assert_eq!(server.login_count(), 0);
}

#[tokio::test]
async fn test_missing_trusted_file_is_reported() {
    let server = start_tls().await;

    let err = connect(fixtures::params(
        &server,
        "Encryption=true;TrustedFile=/nonexistent/ase-trusted.txt",
    ))
    .await
    .expect_err("the trusted file does not exist");

    assert!(matches!(err, Error::Tls(_)), "unexpected error: {err}");
}

// =============================================================================
// Trust callback
// =============================================================================

#[tokio::test]
async fn test_trust_callback_sees_server_certificate() {
    let server = start_tls().await;
    let expected = server
        .tls_identity()
        .expect("server uses TLS")
        .certificate()
        .clone();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::clone(&seen);
    let tls = TlsConfig::new().trust_callback(move |end_entity, _intermediates, host| {
        calls.lock().push(host.to_string());
        end_entity.as_ref() == expected.as_ref()
    });
    let params = ConnectionParameters::parse(&fixtures::connection_string(&server, ""))
        .expect("valid connection string")
        .tls(tls);

    let mut session = connect(Arc::new(params)).await.expect("TLS login should succeed");
    session.ping().await.expect("ping over TLS");

    assert_eq!(*seen.lock(), vec![server.host()]);
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_trust_callback_rejection_fails_handshake() {
    let server = start_tls().await;
    let params = ConnectionParameters::parse(&fixtures::connection_string(&server, ""))
        .expect("valid connection string")
        .tls(TlsConfig::new().trust_callback(|_, _, _| false));

    let err = connect(Arc::new(params)).await.expect_err("callback rejects");
    assert!(matches!(err, Error::Tls(_)), "unexpected error: {err}");
    assert!(err.is_transport());
    assert_eq!(server.login_count(), 0);
}

// =============================================================================
// Plaintext server
// =============================================================================

#[tokio::test]
async fn test_tls_against_plaintext_server_fails() {
    fixtures::init_tracing();
    let server = MockAseServer::builder()
        .build()
        .await
        .expect("mock server should start");

    let err = connect(fixtures::params(
        &server,
        "Encryption=true;LoginTimeout=5",
    ))
    .await
    .expect_err("a plaintext server cannot complete a handshake");

    assert!(
        matches!(err, Error::Tls(_) | Error::Io(_) | Error::ConnectionClosed),
        "unexpected error: {err}"
    );
    assert!(err.is_transport());
    assert_eq!(server.login_count(), 0);
}
