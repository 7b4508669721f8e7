//! Process-wide registry of session pools.
//!
//! Pools are keyed by the canonical identity of their connection
//! parameters, so connection strings that only differ in key spelling,
//! order or whitespace share one pool. A pool is created on the first
//! reservation for its identity and lives until it is shut down.

use std::collections::HashMap;
use std::sync::Arc;

use ase_client::{ConnectionParameters, EventSink};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::lifecycle::ConnectionFactory;
use crate::pool::Reserved;
use crate::session::{PooledSession, SessionFactory, SessionPool};

static GLOBAL: Lazy<PoolManager> = Lazy::new(PoolManager::new);

/// Registry of session pools.
#[derive(Default)]
pub struct PoolManager {
    pools: Mutex<HashMap<String, SessionPool>>,
}

impl PoolManager {
    /// An empty registry, independent of [`PoolManager::global`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Reserve a session for `conn_str`.
    pub async fn reserve(
        &self,
        conn_str: &str,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<PooledSession, PoolError> {
        let params = Arc::new(ConnectionParameters::parse(conn_str)?);
        self.reserve_with(params, cancel, events).await
    }

    /// Reserve a session for already parsed parameters.
    ///
    /// With `Pooling=false` a new session is opened and wrapped so that its
    /// release closes it.
    pub async fn reserve_with(
        &self,
        params: Arc<ConnectionParameters>,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<PooledSession, PoolError> {
        if !params.pooling {
            tracing::debug!(address = %params.address(), "opening unpooled session");
            let session = SessionFactory::new(params)
                .new_connection(cancel, events)
                .await?;
            return Ok(Reserved::direct(session));
        }
        let pool = self.pool_for(params)?;
        pool.reserve(cancel, events).await
    }

    /// Hand a session back to the pool it came from.
    pub async fn release(&self, session: PooledSession) {
        session.release().await;
    }

    /// Clear the pool of `conn_str`, if one exists.
    pub async fn clear_pool(&self, conn_str: &str) -> Result<(), PoolError> {
        let params = ConnectionParameters::parse(conn_str)?;
        self.clear_pool_for(&params).await;
        Ok(())
    }

    /// Clear the pool of `params`, if one exists.
    pub async fn clear_pool_for(&self, params: &ConnectionParameters) {
        if let Some(pool) = self.pool(params) {
            pool.clear().await;
        }
    }

    /// Clear every registered pool.
    pub async fn clear_all(&self) {
        let pools: Vec<_> = self.pools.lock().values().cloned().collect();
        for pool in pools {
            pool.clear().await;
        }
    }

    /// Close and forget every registered pool.
    ///
    /// Later reservations create fresh pools.
    pub async fn shutdown(&self) {
        let pools: Vec<_> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        let count = pools.len();
        for pool in pools {
            pool.close().await;
        }
        tracing::info!(pools = count, "pool manager shut down");
    }

    /// The pool registered for `params`.
    #[must_use]
    pub fn pool(&self, params: &ConnectionParameters) -> Option<SessionPool> {
        self.pools.lock().get(&params.identity()).cloned()
    }

    /// Number of registered pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    fn pool_for(&self, params: Arc<ConnectionParameters>) -> Result<SessionPool, PoolError> {
        let key = params.identity();
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&key).filter(|pool| !pool.is_closed()) {
            return Ok(pool.clone());
        }
        let address = params.address();
        let pool = SessionPool::for_params(params)?;
        tracing::info!(
            address = %address,
            max = pool.config().max_size,
            "session pool registered"
        );
        pools.insert(key, pool.clone());
        Ok(pool)
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pool_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_equivalent_strings_share_a_pool() {
        let manager = PoolManager::new();
        let a = Arc::new(ConnectionParameters::parse("Data Source=ase01;Uid=sa;Pwd=x").unwrap());
        let b = Arc::new(
            ConnectionParameters::parse(" pwd = x ; UID=sa;Server=ASE01 ").unwrap(),
        );

        manager.pool_for(a).unwrap();
        manager.pool_for(Arc::clone(&b)).unwrap();
        assert_eq!(manager.pool_count(), 1);
        assert!(manager.pool(&b).is_some());

        let other = Arc::new(ConnectionParameters::parse("Data Source=ase02;Uid=sa").unwrap());
        manager.pool_for(other).unwrap();
        assert_eq!(manager.pool_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_forgets_pools() {
        let manager = PoolManager::new();
        let params = Arc::new(ConnectionParameters::parse("Data Source=ase01;Uid=sa").unwrap());
        let pool = manager.pool_for(params).unwrap();

        manager.shutdown().await;
        assert!(pool.is_closed());
        assert_eq!(manager.pool_count(), 0);
    }

    #[tokio::test]
    async fn test_clear_unknown_pool_is_noop() {
        let manager = PoolManager::new();
        manager.clear_pool("Data Source=nowhere;Uid=sa").await.unwrap();
        assert_eq!(manager.pool_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_connection_string() {
        let manager = PoolManager::new();
        let result = manager
            .reserve("no equals sign", &CancellationToken::new(), EventSink::new())
            .await;
        assert!(matches!(result, Err(PoolError::Connection(_))));
    }

    #[tokio::test]
    async fn test_invalid_pool_size_is_rejected() {
        let manager = PoolManager::new();
        let params = Arc::new(
            ConnectionParameters::new()
                .data_source("ase01")
                .credentials("sa", "")
                .pool_size(9, 2),
        );
        assert!(manager.pool_for(params).is_err());
        assert_eq!(manager.pool_count(), 0);
    }
}
