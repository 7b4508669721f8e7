//! Pool configuration.

use std::time::Duration;

use ase_client::ConnectionParameters;

use crate::error::PoolError;

/// Default interval of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for a session pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// methods, [`Default::default()`] or [`PoolConfig::from`] a
/// [`ConnectionParameters`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Floor of open sessions, maintained once the pool has seen demand.
    pub min_size: u32,

    /// Ceiling of sessions open at once, idle and in use combined.
    pub max_size: u32,

    /// How long a reservation waits for a session.
    pub acquire_timeout: Duration,

    /// Idle sessions older than this are closed instead of handed out.
    pub idle_timeout: Option<Duration>,

    /// Sessions older than this are closed on release or reservation.
    pub max_lifetime: Option<Duration>,

    /// Ping idle sessions before handing them out.
    pub ping_on_reserve: bool,

    /// Interval of the background eviction and top-up sweep; `None` keeps
    /// all maintenance lazy.
    pub sweep_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&ConnectionParameters::new())
    }
}

impl From<&ConnectionParameters> for PoolConfig {
    fn from(params: &ConnectionParameters) -> Self {
        Self {
            min_size: params.min_pool_size,
            max_size: params.max_pool_size,
            acquire_timeout: params.login_timeout,
            idle_timeout: params.connection_idle_timeout,
            max_lifetime: params.connection_lifetime,
            ping_on_reserve: params.ping_server,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the floor of open sessions.
    #[must_use]
    pub fn min_size(mut self, size: u32) -> Self {
        self.min_size = size;
        self
    }

    /// Set the ceiling of open sessions.
    #[must_use]
    pub fn max_size(mut self, size: u32) -> Self {
        self.max_size = size;
        self
    }

    /// Set the reservation timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the maximum session lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Enable or disable the pre-use ping.
    #[must_use]
    pub fn ping_on_reserve(mut self, enabled: bool) -> Self {
        self.ping_on_reserve = enabled;
        self
    }

    /// Set or disable the background sweep.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".into(),
            ));
        }
        if self.sweep_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(PoolError::Configuration(
                "sweep_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_parameters() {
        let params = ConnectionParameters::parse(
            "Data Source=ase01;Uid=sa;Min Pool Size=2;Max Pool Size=8;\
             ConnectionIdleTimeout=60;ConnectionLifetime=600;LoginTimeout=5;PingServer=false",
        )
        .unwrap();
        let config = PoolConfig::from(&params);
        assert_eq!(config.min_size, 2);
        assert_eq!(config.max_size, 8);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(600)));
        assert!(!config.ping_on_reserve);
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new()
            .min_size(1)
            .max_size(4)
            .acquire_timeout(Duration::from_millis(250))
            .idle_timeout(Duration::from_secs(10))
            .sweep_interval(None);
        assert_eq!(config.max_size, 4);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(10)));
        assert!(config.sweep_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        assert!(PoolConfig::new().max_size(0).validate().is_err());
        assert!(PoolConfig::new().min_size(5).max_size(2).validate().is_err());
        assert!(
            PoolConfig::new()
                .acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
