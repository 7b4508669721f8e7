//! Pooling of [`ase_client::Session`].

use std::sync::Arc;

use ase_client::{ConnectionParameters, EventSink, Session};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionFactory, ConnectionLifecycle};
use crate::pool::{Pool, Reserved};

/// A pool of ASE sessions.
pub type SessionPool = Pool<SessionFactory>;

/// A session reserved from a [`SessionPool`] or opened directly.
pub type PooledSession = Reserved<SessionFactory>;

/// Opens sessions for one set of connection parameters.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    params: Arc<ConnectionParameters>,
}

impl SessionFactory {
    /// Create a factory for `params`.
    #[must_use]
    pub fn new(params: Arc<ConnectionParameters>) -> Self {
        Self { params }
    }

    /// Parameters every session is opened with.
    #[must_use]
    pub fn params(&self) -> &Arc<ConnectionParameters> {
        &self.params
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for SessionFactory {
    type Connection = Session;

    async fn new_connection(
        &self,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<Session, PoolError> {
        Ok(Session::connect(Arc::clone(&self.params), cancel, events).await?)
    }
}

#[async_trait::async_trait]
impl ConnectionLifecycle for Session {
    async fn ping(&mut self) -> Result<(), PoolError> {
        Ok(Session::ping(self).await?)
    }

    fn is_doomed(&self) -> bool {
        Session::is_doomed(self) || !self.state().is_usable()
    }

    fn in_transaction(&self) -> bool {
        Session::in_transaction(self)
    }

    async fn close(self) -> Result<(), PoolError> {
        Ok(Session::close(self).await?)
    }

    fn set_events(&mut self, events: EventSink) {
        Session::set_events(self, events);
    }
}

impl SessionPool {
    /// Pool sessions for `params`, sized and timed by its pool settings.
    pub fn for_params(params: Arc<ConnectionParameters>) -> Result<Self, PoolError> {
        params.validate()?;
        let config = PoolConfig::from(params.as_ref());
        Pool::new(SessionFactory::new(params), config)
    }
}
