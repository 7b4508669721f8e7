//! Session lifecycle traits.
//!
//! The pool only ever talks to a session through these traits, so tests and
//! alternative transports can plug in their own connection types.

use std::time::Duration;

use ase_client::EventSink;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;

/// Operations the pool needs from a pooled connection.
#[async_trait::async_trait]
pub trait ConnectionLifecycle: Send + Sized + 'static {
    /// Round-trip a trivial request to verify the connection is alive.
    async fn ping(&mut self) -> Result<(), PoolError>;

    /// Whether the connection was broken and must not be reused.
    fn is_doomed(&self) -> bool;

    /// Whether the connection holds a transaction its owner left open.
    ///
    /// Such a connection is closed on release, which rolls the transaction
    /// back on the server.
    fn in_transaction(&self) -> bool {
        false
    }

    /// Close the connection and release its socket.
    async fn close(self) -> Result<(), PoolError>;

    /// Route further events of a reused connection to its new owner.
    fn set_events(&mut self, _events: EventSink) {}
}

/// Creates new connections for a pool.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory.
    type Connection: ConnectionLifecycle;

    /// Open and log in a new connection.
    ///
    /// Implementations stop as soon as `cancel` fires.
    async fn new_connection(
        &self,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<Self::Connection, PoolError>;
}

/// Bookkeeping the pool keeps next to each connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique identifier.
    pub id: u64,
    /// Pool generation the connection was created in.
    pub generation: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last returned or handed out.
    pub last_used_at: Instant,
    /// Number of times the connection has been handed out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Metadata for a connection created now.
    #[must_use]
    pub fn new(id: u64, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            generation,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    /// Check if the connection has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used_at.elapsed() > timeout)
    }

    /// Mark the connection as handed out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_expiry() {
        let mut meta = ConnectionMetadata::new(1, 0);
        assert!(!meta.is_expired(None));
        assert!(!meta.is_idle_expired(None));
        assert!(!meta.is_expired(Some(Duration::from_secs(3600))));

        meta.created_at = Instant::now() - Duration::from_secs(10);
        meta.last_used_at = Instant::now() - Duration::from_secs(10);
        assert!(meta.is_expired(Some(Duration::from_secs(5))));
        assert!(meta.is_idle_expired(Some(Duration::from_secs(5))));

        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 1);
        assert!(!meta.is_idle_expired(Some(Duration::from_secs(5))));
        assert!(meta.is_expired(Some(Duration::from_secs(5))));
    }
}
