//! # ase-driver-pool
//!
//! Connection pooling for Sybase/SAP ASE sessions.
//!
//! A [`Pool`] bounds the number of open sessions with a semaphore, reuses
//! idle sessions most-recently-used first and retires sessions that are
//! doomed, expired or cleared. [`PoolManager`] keeps one pool per
//! connection identity for the whole process.
//!
//! ## Features
//!
//! - `MaxPoolSize` ceiling enforced by reservation slots
//! - Pre-use ping (`PingServer`), idle timeout and maximum lifetime
//! - `ClearPool` invalidation through pool generations
//! - Optional background sweep that keeps `MinPoolSize` sessions open
//!   after the first reservation
//! - Reservations bounded by `LoginTimeout` and a cancellation token
//!
//! ## Example
//!
//! ```rust,ignore
//! use ase_client::{CancellationToken, EventSink};
//! use ase_driver_pool::PoolManager;
//!
//! let conn_str = "Data Source=ase01;Port=5000;Uid=sa;Pwd=secret;Max Pool Size=20";
//! let mut session = PoolManager::global()
//!     .reserve(conn_str, &CancellationToken::new(), EventSink::new())
//!     .await?;
//! session.execute_non_query("update titles set price = price * 1.1", &[]).await?;
//! session.release().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod pool;
pub mod session;

pub use config::{DEFAULT_SWEEP_INTERVAL, PoolConfig};
pub use error::PoolError;
pub use lifecycle::{ConnectionFactory, ConnectionLifecycle, ConnectionMetadata};
pub use manager::PoolManager;
pub use pool::{Pool, PoolMetrics, PoolStatus, Reserved};
pub use session::{PooledSession, SessionFactory, SessionPool};
