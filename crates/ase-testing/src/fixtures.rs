//! Test fixture utilities.

use std::sync::Arc;

use ase_client::ConnectionParameters;

use crate::mock_server::MockAseServer;

/// Login name accepted by fixtures.
pub const TEST_USER: &str = "sa";

/// Password accepted by fixtures.
pub const TEST_PASSWORD: &str = "secret";

/// Connection string pointing at `server`, with `extra` settings appended.
#[must_use]
pub fn connection_string(server: &MockAseServer, extra: &str) -> String {
    let mut conn_str = format!(
        "Data Source={};Port={};Uid={TEST_USER};Pwd={TEST_PASSWORD}",
        server.host(),
        server.port()
    );
    if !extra.is_empty() {
        conn_str.push(';');
        conn_str.push_str(extra.trim_start_matches(';'));
    }
    conn_str
}

/// Parameters pointing at `server`.
///
/// # Panics
///
/// Panics if `extra` makes the connection string invalid.
#[must_use]
#[allow(clippy::expect_used)]
pub fn params(server: &MockAseServer, extra: &str) -> Arc<ConnectionParameters> {
    Arc::new(
        ConnectionParameters::parse(&connection_string(server, extra))
            .expect("fixture connection string should parse"),
    )
}

/// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
