//! Cancellation and timeouts against the mock server.
//!
//! ```bash
//! cargo test -p ase-testing --test cancel
//! ```

#![allow(clippy::expect_used)]

use std::time::{Duration, Instant};

use ase_client::{CancellationToken, Error, EventSink, Session, SqlValue};
use ase_testing::fixtures;
use ase_testing::{MockAseServer, MockResponse, MockServerBuilder};

async fn start(builder: MockServerBuilder) -> MockAseServer {
    fixtures::init_tracing();
    builder.build().await.expect("mock server should start")
}

async fn connect(server: &MockAseServer) -> Session {
    Session::connect(
        fixtures::params(server, ""),
        &CancellationToken::new(),
        EventSink::new(),
    )
    .await
    .expect("login should succeed")
}

fn cancel_after(token: &CancellationToken, delay: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

// =============================================================================
// Request cancellation
// =============================================================================

#[tokio::test]
async fn test_cancellation_token_sends_attention() {
    let server = start(MockAseServer::builder().with_response(
        "waitfor delay '00:00:30'",
        MockResponse::delayed(Duration::from_secs(30), MockResponse::affected(1)),
    ))
    .await;
    let mut session = connect(&server).await;

    let token = CancellationToken::new();
    session.set_request_cancellation(token.clone());
    cancel_after(&token, Duration::from_millis(50));

    let started = Instant::now();
    let err = session
        .execute_non_query("waitfor delay '00:00:30'", &[])
        .await
        .expect_err("request should be cancelled");

    assert!(matches!(err, Error::Cancelled), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(server.attention_count(), 1);

    // The acknowledged attention leaves the session usable.
    assert!(!session.is_doomed());
    let value = session.execute_scalar("select 1", &[]).await.expect("query");
    assert_eq!(value, Some(SqlValue::Int(1)));
}

#[tokio::test]
async fn test_cancel_handle_from_another_task() {
    let server = start(MockAseServer::builder().with_response(
        "exec long_report",
        MockResponse::delayed(Duration::from_secs(30), MockResponse::empty()),
    ))
    .await;
    let mut session = connect(&server).await;

    let handle = session.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel().await.expect("attention should be sent")
    });

    let err = session
        .execute_non_query("exec long_report", &[])
        .await
        .expect_err("request should be cancelled");
    assert!(err.is_cancelled(), "unexpected error: {err}");
    assert!(canceller.await.expect("task"));
    session.ping().await.expect("session should still work");
}

#[tokio::test]
async fn test_cancel_without_request_is_noop() {
    let server = start(MockAseServer::builder()).await;
    let session = connect(&server).await;

    let sent = session
        .cancel_handle()
        .cancel()
        .await
        .expect("cancel should not fail");
    assert!(!sent);
    assert_eq!(server.attention_count(), 0);
}

#[tokio::test]
async fn test_unacknowledged_attention_dooms_session() {
    let server = start(MockAseServer::builder().with_response("exec stuck", MockResponse::Hang)).await;
    let mut session = connect(&server).await;
    session.set_attention_grace(Duration::from_millis(100));

    let token = CancellationToken::new();
    session.set_request_cancellation(token.clone());
    cancel_after(&token, Duration::from_millis(50));

    let err = session
        .execute_non_query("exec stuck", &[])
        .await
        .expect_err("request should be cancelled");
    assert!(matches!(err, Error::Cancelled), "unexpected error: {err}");
    assert!(session.is_doomed());
    assert!(matches!(
        session.ping().await,
        Err(Error::SessionDoomed)
    ));
}

#[tokio::test]
async fn test_unacknowledged_cancel_handle_dooms_session() {
    let server = start(MockAseServer::builder().with_response("exec stuck", MockResponse::Hang)).await;
    let mut session = connect(&server).await;
    session.set_attention_grace(Duration::from_millis(100));

    // The owning task is already parked in a read when the attention goes out.
    let handle = session.cancel_handle();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel().await.expect("attention should be sent")
    });

    let err = tokio::time::timeout(
        Duration::from_secs(3),
        session.execute_non_query("exec stuck", &[]),
    )
    .await
    .expect("grace period should bound the read")
    .expect_err("request should be cancelled");

    assert!(matches!(err, Error::Cancelled), "unexpected error: {err}");
    assert!(canceller.await.expect("task"));
    assert_eq!(server.attention_count(), 1);
    assert!(session.is_doomed());
}

#[tokio::test]
async fn test_pre_cancelled_token_sends_nothing() {
    let server = start(MockAseServer::builder()).await;
    let mut session = connect(&server).await;
    let before = server.requests().len();

    let token = CancellationToken::new();
    token.cancel();
    session.set_request_cancellation(token);

    let err = session
        .execute_non_query("select 1", &[])
        .await
        .expect_err("request should not start");
    assert!(err.is_cancelled());
    assert_eq!(server.requests().len(), before);
    session.ping().await.expect("session should still work");
}

// =============================================================================
// Login cancellation and timeout
// =============================================================================

#[tokio::test]
async fn test_login_cancelled() {
    let server = start(MockAseServer::builder().with_login_delay(Duration::from_secs(30))).await;
    let token = CancellationToken::new();
    cancel_after(&token, Duration::from_millis(50));

    let started = Instant::now();
    let err = Session::connect(fixtures::params(&server, ""), &token, EventSink::new())
        .await
        .expect_err("login should be cancelled");
    assert!(matches!(err, Error::Cancelled), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_login_timeout() {
    let server = start(MockAseServer::builder().with_login_delay(Duration::from_secs(30))).await;

    let err = Session::connect(
        fixtures::params(&server, "LoginTimeout=1"),
        &CancellationToken::new(),
        EventSink::new(),
    )
    .await
    .expect_err("login should time out");
    assert!(matches!(err, Error::ConnectTimeout), "unexpected error: {err}");
}
