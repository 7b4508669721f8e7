//! Pool and pool manager behaviour against the mock server.
//!
//! ```bash
//! cargo test -p ase-testing --test pool
//! ```

#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use ase_client::{CancellationToken, EventSink};
use ase_driver_pool::{PoolError, PoolManager, SessionPool};
use ase_testing::fixtures;
use ase_testing::{MockAseServer, MockResponse};
use bytes::Bytes;
use parking_lot::Mutex;

async fn start() -> MockAseServer {
    fixtures::init_tracing();
    MockAseServer::builder()
        .with_response("shutdown", MockResponse::Disconnect)
        .with_response("print 'hello'", MockResponse::info("hello"))
        .with_response("select garbage", MockResponse::RawBytes(Bytes::from_static(&[0x01])))
        .build()
        .await
        .expect("mock server should start")
}

/// Wait for spawned logouts and returns to land.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_ceiling_is_never_exceeded() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(
        &server,
        "Max Pool Size=3;LoginTimeout=10",
    ))
    .expect("valid pool");

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let mut session = pool
                    .reserve(&CancellationToken::new(), EventSink::new())
                    .await
                    .expect("reservation should succeed");
                assert!(pool.status().in_use <= 3);
                session.ping().await.expect("ping");
                session.release().await;
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task");
    }

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.total <= 3);
    assert!(server.login_count() <= 3);
}

#[tokio::test]
async fn test_reservation_times_out_at_ceiling() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(&server, "Max Pool Size=1;LoginTimeout=1"))
        .expect("valid pool");

    let held = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("first reservation");
    let err = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect_err("pool is exhausted");
    assert!(matches!(err, PoolError::AcquisitionTimeout(_)), "unexpected error: {err}");

    held.release().await;
    let again = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("released slot is available");
    again.release().await;
    assert_eq!(server.login_count(), 1);
}

#[tokio::test]
async fn test_doomed_session_is_not_reused() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(&server, "Max Pool Size=2"))
        .expect("valid pool");

    let mut session = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    let _ = session.execute_non_query("shutdown", &[]).await;
    assert!(session.is_doomed());
    session.release().await;
    assert_eq!(pool.status().available, 0);

    let mut fresh = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    assert!(!fresh.is_doomed());
    fresh.ping().await.expect("fresh session works");
    fresh.release().await;
    assert_eq!(server.login_count(), 2);
}

#[tokio::test]
async fn test_protocol_fault_session_is_not_reused() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(&server, "Max Pool Size=1"))
        .expect("valid pool");

    let mut session = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    let err = session
        .execute_non_query("select garbage", &[])
        .await
        .expect_err("malformed response");
    assert!(err.is_protocol_error(), "unexpected error: {err}");
    assert!(session.is_doomed());
    session.release().await;
    assert_eq!(pool.status().available, 0);

    let mut fresh = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    fresh.ping().await.expect("fresh session works");
    fresh.release().await;
    assert_eq!(server.login_count(), 2);
}

#[tokio::test]
async fn test_open_transaction_session_is_not_reused() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(&server, "Max Pool Size=1"))
        .expect("valid pool");

    let mut session = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    session.begin_transaction().await.expect("begin");
    assert!(session.in_transaction());
    session.release().await;
    assert_eq!(pool.status().available, 0);

    let fresh = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    assert!(!fresh.in_transaction());
    fresh.release().await;
    assert_eq!(server.login_count(), 2);
    assert_eq!(pool.metrics().connections_closed, 1);
}

#[tokio::test]
async fn test_idle_timeout_evicts_session() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(
        &server,
        "Max Pool Size=2;ConnectionIdleTimeout=1",
    ))
    .expect("valid pool");

    pool.reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let session = pool
        .reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    session.release().await;
    assert_eq!(server.login_count(), 2);
    assert_eq!(pool.metrics().connections_closed, 1);
}

#[tokio::test]
async fn test_ping_on_reserve() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(&server, "PingServer=true"))
        .expect("valid pool");

    pool.reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;
    let before = server.requests().len();
    pool.reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;

    let requests = server.requests();
    assert_eq!(requests.len(), before + 1);
    assert_eq!(requests[before].text(), "select 1");
}

#[tokio::test]
async fn test_reused_session_reports_to_new_owner() {
    let server = start().await;
    let pool = SessionPool::for_params(fixtures::params(&server, "Max Pool Size=1"))
        .expect("valid pool");
    pool.reserve(&CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;

    let events = EventSink::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    events.on_info(move |message| sink.lock().push(message.text.clone()));

    let mut session = pool
        .reserve(&CancellationToken::new(), events)
        .await
        .expect("reservation");
    session
        .execute_non_query("print 'hello'", &[])
        .await
        .expect("print");
    session.release().await;

    assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    assert_eq!(server.login_count(), 1);
}

// =============================================================================
// Pool manager
// =============================================================================

#[tokio::test]
async fn test_manager_shares_pool_between_equivalent_strings() {
    let server = start().await;
    let manager = PoolManager::new();
    let conn_str = fixtures::connection_string(&server, "Max Pool Size=4");
    let respelled = format!("  max pool size = 4 ;{}", conn_str.replace("Data Source", "Server"));

    manager
        .reserve(&conn_str, &CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;
    let session = manager
        .reserve(&respelled, &CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");
    manager.release(session).await;

    assert_eq!(manager.pool_count(), 1);
    assert_eq!(server.login_count(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_clear_pool_invalidates_sessions() {
    let server = start().await;
    let manager = PoolManager::new();
    let conn_str = fixtures::connection_string(&server, "Max Pool Size=4");
    let token = CancellationToken::new();

    let in_use = manager
        .reserve(&conn_str, &token, EventSink::new())
        .await
        .expect("reservation");
    manager
        .reserve(&conn_str, &token, EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;

    manager.clear_pool(&conn_str).await.expect("clear");
    let pool = manager
        .pool(&ase_client::ConnectionParameters::parse(&conn_str).expect("valid"))
        .expect("pool is registered");
    assert_eq!(pool.status().available, 0);

    // Cleared while in use: closed on release instead of returned.
    manager.release(in_use).await;
    assert_eq!(pool.status().total, 0);

    manager
        .reserve(&conn_str, &token, EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;
    assert_eq!(server.login_count(), 3);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_unpooled_session_is_closed_on_release() {
    let server = start().await;
    let manager = PoolManager::new();
    let conn_str = fixtures::connection_string(&server, "Pooling=false");

    for _ in 0..2 {
        let session = manager
            .reserve(&conn_str, &CancellationToken::new(), EventSink::new())
            .await
            .expect("reservation");
        assert!(!session.is_pooled());
        manager.release(session).await;
    }
    settle().await;

    assert_eq!(manager.pool_count(), 0);
    assert_eq!(server.login_count(), 2);
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_reservation_cancelled_while_waiting() {
    let server = start().await;
    let manager = PoolManager::new();
    let conn_str = fixtures::connection_string(&server, "Max Pool Size=1;LoginTimeout=30");

    let held = manager
        .reserve(&conn_str, &CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation");

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let err = manager
        .reserve(&conn_str, &token, EventSink::new())
        .await
        .expect_err("reservation should be cancelled");
    assert!(matches!(err, PoolError::Cancelled), "unexpected error: {err}");

    manager.release(held).await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_idle_sessions() {
    let server = start().await;
    let manager = PoolManager::new();
    let conn_str = fixtures::connection_string(&server, "");

    manager
        .reserve(&conn_str, &CancellationToken::new(), EventSink::new())
        .await
        .expect("reservation")
        .release()
        .await;
    manager.shutdown().await;
    settle().await;

    assert_eq!(manager.pool_count(), 0);
    assert_eq!(server.connection_count(), 0);
}
