//! Session pool implementation.
//!
//! A pool hands out at most `max_size` sessions at once. Every reservation
//! holds one semaphore permit for as long as its guard lives, and a new
//! session is only created by a permit holder that found no usable idle
//! session. The idle set is a LIFO queue so the most recently used session
//! is reused first and unused ones age out.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ase_client::EventSink;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionFactory, ConnectionLifecycle, ConnectionMetadata};

/// A pool of connections created by `F`.
///
/// Cloning a pool is cheap; clones share the same sessions.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct IdleEntry<C> {
    conn: C,
    meta: ConnectionMetadata,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    closed: AtomicU64,
    reservations: AtomicU64,
    reused: AtomicU64,
    timeouts: AtomicU64,
    ping_failures: AtomicU64,
}

struct PoolInner<F: ConnectionFactory> {
    config: PoolConfig,
    factory: F,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleEntry<F::Connection>>>,
    in_use: AtomicUsize,
    generation: AtomicU64,
    next_id: AtomicU64,
    closed: AtomicBool,
    demanded: AtomicBool,
    counters: Counters,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool. No session is opened until the first reservation.
    ///
    /// When called inside a tokio runtime and `config.sweep_interval` is
    /// set, a background task evicts stale idle sessions and tops the pool
    /// up to `min_size`. The task stops once every handle to the pool is
    /// dropped.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let max = config.max_size as usize;
        let inner = Arc::new(PoolInner {
            semaphore: Arc::new(Semaphore::new(max)),
            idle: Mutex::new(VecDeque::with_capacity(max)),
            in_use: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            demanded: AtomicBool::new(false),
            counters: Counters::default(),
            factory,
            config,
        });

        if let Some(interval) = inner.config.sweep_interval {
            spawn_sweeper(&inner, interval);
        }

        tracing::debug!(
            min = inner.config.min_size,
            max = inner.config.max_size,
            "session pool created"
        );
        Ok(Self { inner })
    }

    /// Reserve a session.
    ///
    /// Reuses the most recently returned idle session that is not doomed,
    /// expired or cleared, and that answers a ping when `ping_on_reserve`
    /// is set. Otherwise a new session is created if the pool is below its
    /// ceiling. At the ceiling the call waits for a release, bounded by
    /// `acquire_timeout`, and stops as soon as `cancel` fires.
    pub async fn reserve(
        &self,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<Reserved<F>, PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }
        inner.demanded.store(true, Ordering::Relaxed);
        inner.counters.reservations.fetch_add(1, Ordering::Relaxed);

        let timeout = inner.config.acquire_timeout;
        let attempt = async {
            let permit = Arc::clone(&inner.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PoolError::PoolClosed)?;
            self.checkout(permit, cancel, events).await
        };
        let bounded = async {
            match Instant::now().checked_add(timeout) {
                Some(deadline) => tokio::time::timeout_at(deadline, attempt)
                    .await
                    .unwrap_or(Err(PoolError::AcquisitionTimeout(timeout))),
                None => attempt.await,
            }
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(PoolError::Cancelled),
            result = bounded => result,
        };

        if let Err(PoolError::AcquisitionTimeout(_)) = &result {
            inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            let status = self.status();
            tracing::warn!(
                timeout = ?timeout,
                in_use = status.in_use,
                max = status.max,
                "session reservation timed out"
            );
        }
        result
    }

    async fn checkout(
        &self,
        permit: OwnedSemaphorePermit,
        cancel: &CancellationToken,
        events: EventSink,
    ) -> Result<Reserved<F>, PoolError> {
        let inner = &self.inner;
        loop {
            let entry = inner.idle.lock().pop_back();
            let Some(IdleEntry { mut conn, mut meta }) = entry else {
                break;
            };

            if let Some(reason) = inner.idle_reason(&conn, &meta) {
                inner.discard(conn, &meta, reason).await;
                continue;
            }
            if inner.config.ping_on_reserve {
                if let Err(e) = conn.ping().await {
                    inner.counters.ping_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(id = meta.id, error = %e, "pooled session failed ping");
                    inner.discard(conn, &meta, "ping failed").await;
                    continue;
                }
            }

            conn.set_events(events);
            meta.mark_checkout();
            inner.counters.reused.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(id = meta.id, "reusing pooled session");
            return Ok(Reserved::pooled(conn, meta, Arc::clone(inner), permit));
        }

        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let generation = inner.generation.load(Ordering::Acquire);
        let conn = inner.factory.new_connection(cancel, events).await?;
        inner.counters.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id, generation, "pooled session created");

        let mut meta = ConnectionMetadata::new(id, generation);
        meta.mark_checkout();
        Ok(Reserved::pooled(conn, meta, Arc::clone(inner), permit))
    }

    /// Close every idle session and retire every session currently in use
    /// once it is released.
    pub async fn clear(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        tracing::info!(generation, closed = drained.len(), "session pool cleared");
        for entry in drained {
            self.inner.discard(entry.conn, &entry.meta, "pool cleared").await;
        }
    }

    /// Close the pool.
    ///
    /// Pending and future reservations fail with [`PoolError::PoolClosed`].
    /// Idle sessions are closed now, sessions in use when they are released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.semaphore.close();
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        for entry in drained {
            self.inner.discard(entry.conn, &entry.meta, "pool closed").await;
        }
        tracing::info!("session pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Current counts of idle and in-use sessions.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let available = self.inner.idle.lock().len();
        let in_use = self.inner.in_use.load(Ordering::Acquire);
        PoolStatus {
            available: to_u32(available),
            in_use: to_u32(in_use),
            total: to_u32(available + in_use),
            max: self.inner.config.max_size,
        }
    }

    /// Lifetime counters of this pool.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let counters = &self.inner.counters;
        PoolMetrics {
            connections_created: counters.created.load(Ordering::Relaxed),
            connections_closed: counters.closed.load(Ordering::Relaxed),
            reservations: counters.reservations.load(Ordering::Relaxed),
            reuses: counters.reused.load(Ordering::Relaxed),
            timeouts: counters.timeouts.load(Ordering::Relaxed),
            ping_failures: counters.ping_failures.load(Ordering::Relaxed),
        }
    }

    /// Current generation; bumped by every [`Pool::clear`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Run one eviction and top-up pass now.
    pub async fn sweep(&self) {
        self.inner.sweep().await;
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .field("generation", &self.generation())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// Why a session must not go back to the idle set.
    fn retire_reason(&self, conn: &F::Connection, meta: &ConnectionMetadata) -> Option<&'static str> {
        if self.closed.load(Ordering::Acquire) {
            Some("pool closed")
        } else if conn.is_doomed() {
            Some("doomed")
        } else if conn.in_transaction() {
            Some("open transaction")
        } else if meta.generation != self.generation.load(Ordering::Acquire) {
            Some("pool cleared")
        } else if meta.is_expired(self.config.max_lifetime) {
            Some("lifetime exceeded")
        } else {
            None
        }
    }

    /// Why an idle session must not be handed out.
    fn idle_reason(&self, conn: &F::Connection, meta: &ConnectionMetadata) -> Option<&'static str> {
        self.retire_reason(conn, meta).or_else(|| {
            meta.is_idle_expired(self.config.idle_timeout)
                .then_some("idle timeout")
        })
    }

    async fn discard(&self, conn: F::Connection, meta: &ConnectionMetadata, reason: &'static str) {
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(id = meta.id, reason, "closing pooled session");
        if let Err(e) = conn.close().await {
            tracing::debug!(id = meta.id, error = %e, "pooled session did not close cleanly");
        }
    }

    async fn check_in(
        &self,
        conn: F::Connection,
        mut meta: ConnectionMetadata,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        match self.retire_reason(&conn, &meta) {
            Some(reason) => {
                drop(permit);
                self.discard(conn, &meta, reason).await;
            }
            None => {
                meta.mark_checkin();
                tracing::trace!(id = meta.id, "session returned to pool");
                self.idle.lock().push_back(IdleEntry { conn, meta });
                // The session is idle before its slot frees, so a waiter
                // woken by the permit finds it.
                drop(permit);
            }
        }
    }

    async fn sweep(self: &Arc<Self>) {
        let stale: Vec<(IdleEntry<F::Connection>, &'static str)> = {
            let mut idle = self.idle.lock();
            let mut stale = Vec::new();
            let mut keep = VecDeque::with_capacity(idle.len());
            for entry in idle.drain(..) {
                match self.idle_reason(&entry.conn, &entry.meta) {
                    Some(reason) => stale.push((entry, reason)),
                    None => keep.push_back(entry),
                }
            }
            *idle = keep;
            stale
        };
        if !stale.is_empty() {
            tracing::debug!(evicted = stale.len(), "sweep evicted idle sessions");
        }
        for (entry, reason) in stale {
            self.discard(entry.conn, &entry.meta, reason).await;
        }

        if self.demanded.load(Ordering::Relaxed) {
            self.top_up().await;
        }
    }

    /// Open idle sessions until the pool holds `min_size`.
    async fn top_up(self: &Arc<Self>) {
        let min = self.config.min_size as usize;
        let max = self.config.max_size as usize;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                return;
            };
            let held = max - self.semaphore.available_permits();
            let idle = self.idle.lock().len();
            let in_use = self.in_use.load(Ordering::Acquire);
            // Every idle session and every permit holder counts toward the
            // ceiling; this permit is one of the holders.
            if idle + in_use >= min || idle + held > max {
                return;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let generation = self.generation.load(Ordering::Acquire);
            let cancel = CancellationToken::new();
            let created = tokio::time::timeout(
                self.config.acquire_timeout,
                self.factory.new_connection(&cancel, EventSink::new()),
            )
            .await;
            match created {
                Ok(Ok(conn)) => {
                    self.counters.created.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(id, "pool topped up to its minimum");
                    self.idle.lock().push_back(IdleEntry {
                        conn,
                        meta: ConnectionMetadata::new(id, generation),
                    });
                    drop(permit);
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "could not open a session for the pool minimum");
                    return;
                }
                Err(_) => {
                    cancel.cancel();
                    tracing::warn!("timed out opening a session for the pool minimum");
                    return;
                }
            }
        }
    }
}

fn spawn_sweeper<F: ConnectionFactory>(inner: &Arc<PoolInner<F>>, interval: Duration) {
    let Ok(handle) = Handle::try_current() else {
        tracing::debug!("no tokio runtime; background pool sweep disabled");
        return;
    };
    let weak: Weak<PoolInner<F>> = Arc::downgrade(inner);
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.closed.load(Ordering::Acquire) {
                break;
            }
            inner.sweep().await;
        }
        tracing::trace!("pool sweep stopped");
    });
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle sessions available.
    pub available: u32,
    /// Number of sessions currently reserved.
    pub in_use: u32,
    /// Total number of open sessions.
    pub total: u32,
    /// Maximum allowed sessions.
    pub max: u32,
}

impl PoolStatus {
    /// Fraction of the ceiling currently in use, in percent.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// Lifetime counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Sessions opened by the factory.
    pub connections_created: u64,
    /// Sessions closed by the pool.
    pub connections_closed: u64,
    /// Reservation attempts.
    pub reservations: u64,
    /// Reservations served from the idle set.
    pub reuses: u64,
    /// Reservations that timed out.
    pub timeouts: u64,
    /// Idle sessions that failed their pre-use ping.
    pub ping_failures: u64,
}

/// A reserved session.
///
/// Derefs to the connection. Hand it back with [`Reserved::release`]; a
/// guard dropped without release is returned from a task spawned on the
/// current runtime. A session reserved outside any pool is closed instead
/// of returned.
pub struct Reserved<F: ConnectionFactory> {
    /// `Some` for the whole life of the guard. Only `release`, `detach` and
    /// `drop` take it, and each of them consumes the guard.
    conn: Option<F::Connection>,
    meta: ConnectionMetadata,
    pool: Option<Arc<PoolInner<F>>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: ConnectionFactory> Reserved<F> {
    fn pooled(
        conn: F::Connection,
        meta: ConnectionMetadata,
        pool: Arc<PoolInner<F>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        pool.in_use.fetch_add(1, Ordering::AcqRel);
        Self {
            conn: Some(conn),
            meta,
            pool: Some(pool),
            permit: Some(permit),
        }
    }

    /// Wrap a session that belongs to no pool.
    #[must_use]
    pub fn direct(conn: F::Connection) -> Self {
        let mut meta = ConnectionMetadata::new(0, 0);
        meta.mark_checkout();
        Self {
            conn: Some(conn),
            meta,
            pool: None,
            permit: None,
        }
    }

    /// Whether this session came from a pool.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pool.is_some()
    }

    /// Pool bookkeeping for this session.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }

    /// Return the session to its pool, or close it if it is doomed, expired,
    /// still in a transaction, cleared or was never pooled.
    pub async fn release(mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match self.pool.take() {
            Some(pool) => {
                let permit = self.permit.take();
                pool.check_in(conn, self.meta.clone(), permit).await;
            }
            None => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "direct session did not close cleanly");
                }
            }
        }
    }

    /// Take the session out of the pool for good.
    ///
    /// Its slot is freed at once and the pool never sees it again.
    #[must_use]
    pub fn detach(mut self) -> Option<F::Connection> {
        if let Some(pool) = self.pool.take() {
            pool.in_use.fetch_sub(1, Ordering::AcqRel);
        }
        self.permit.take();
        self.conn.take()
    }

    fn conn_ref(&self) -> &F::Connection {
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("reserved session is only taken by value"),
        }
    }

    fn conn_mut(&mut self) -> &mut F::Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("reserved session is only taken by value"),
        }
    }
}

impl<F: ConnectionFactory> Deref for Reserved<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn_ref()
    }
}

impl<F: ConnectionFactory> DerefMut for Reserved<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn_mut()
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Reserved<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reserved")
            .field("id", &self.meta.id)
            .field("generation", &self.meta.generation)
            .field("pooled", &self.is_pooled())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Drop for Reserved<F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let pool = self.pool.take();
        let permit = self.permit.take();
        let meta = self.meta.clone();

        let Ok(handle) = Handle::try_current() else {
            // Without a runtime the session cannot be closed gracefully; its
            // socket goes with it.
            if let Some(pool) = pool {
                pool.in_use.fetch_sub(1, Ordering::AcqRel);
                pool.counters.closed.fetch_add(1, Ordering::Relaxed);
            }
            tracing::debug!(id = meta.id, "reserved session dropped outside a runtime");
            return;
        };

        handle.spawn(async move {
            match pool {
                Some(pool) => pool.check_in(conn, meta, permit).await,
                None => {
                    if let Err(e) = conn.close().await {
                        tracing::debug!(error = %e, "direct session did not close cleanly");
                    }
                }
            }
        });
    }
}
