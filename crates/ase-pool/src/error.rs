//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No session became available within the reservation timeout.
    #[error("session reservation timed out after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// The caller cancelled the reservation.
    #[error("reservation cancelled")]
    Cancelled,

    /// Creating, pinging or closing a session failed.
    #[error(transparent)]
    Connection(#[from] ase_client::Error),

    /// A connection factory failed for a reason of its own.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(String),

    /// A pooled session failed its pre-use check.
    #[error("connection health check failed: {0}")]
    UnhealthyConnection(String),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Whether retrying the reservation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AcquisitionTimeout(_) | Self::UnhealthyConnection(_) => true,
            Self::Connection(e) => e.is_transport(),
            Self::PoolClosed
            | Self::Cancelled
            | Self::ConnectionCreation(_)
            | Self::Configuration(_) => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PoolError::AcquisitionTimeout(Duration::from_secs(1)).is_transient());
        assert!(!PoolError::PoolClosed.is_transient());
        assert!(!PoolError::Cancelled.is_transient());
        assert!(PoolError::from(ase_client::Error::ConnectTimeout).is_transient());
    }

    #[test]
    fn test_client_error_is_transparent() {
        let err = PoolError::from(ase_client::Error::ConnectionClosed);
        assert_eq!(
            err.to_string(),
            ase_client::Error::ConnectionClosed.to_string()
        );
    }
}
