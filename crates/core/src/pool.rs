//! Bounded per-authority connection pool
//!
//! Capacity is a semaphore per authority: a permit is held for as long as a
//! connection is checked out, so no more than `max_connections` requests run
//! against one authority at a time. Idle connections wait in a bounded deque
//! (oldest evicted first) and are never reused once they have been idle for
//! longer than `max_idle_duration`; a background reaper closes them
//! proactively.
//!
//! The pool state mutex is held only while the deque is updated, never while
//! connecting or while a request is on the wire.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::Connector;
use crate::uri::Authority;

const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Pool sizing and timing
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum connections checked out at once, per authority
    pub max_connections: usize,
    /// Maximum idle connections kept, per authority
    pub max_idle: usize,
    /// Default bound on waiting for capacity
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed instead of reused
    pub max_idle_duration: Duration,
    /// Period of the background reaper
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_idle: 10,
            acquire_timeout: Duration::from_secs(30),
            max_idle_duration: Duration::from_secs(60),
            reap_interval: Duration::from_secs(15),
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened on a pool miss
    pub created: u64,
    /// Checkouts served from the idle set
    pub reused: u64,
    /// Connections closed because they were released unhealthy or dropped mid-request
    pub discarded: u64,
    /// Idle connections closed for age or because the idle set was full
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

struct IdleConnection<T> {
    connection: T,
    id: u64,
    idle_since: Instant,
}

struct AuthorityState<T> {
    permits: Arc<Semaphore>,
    idle: VecDeque<IdleConnection<T>>,
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<HashMap<Authority, AuthorityState<C::Connection>>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl<C: Connector> PoolInner<C> {
    fn lock(&self) -> MutexGuard<'_, HashMap<Authority, AuthorityState<C::Connection>>> {
        // The guarded map stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn permits_for(&self, authority: &Authority) -> Arc<Semaphore> {
        let mut state = self.lock();
        state
            .entry(authority.clone())
            .or_insert_with(|| AuthorityState {
                permits: Arc::new(Semaphore::new(self.config.max_connections.max(1))),
                idle: VecDeque::new(),
            })
            .permits
            .clone()
    }

    /// Pop the most recently used fresh idle connection, dropping stale ones
    fn take_idle(&self, authority: &Authority) -> Option<IdleConnection<C::Connection>> {
        let max_age = self.config.max_idle_duration;
        let mut stale = Vec::new();
        let fresh = {
            let mut state = self.lock();
            let entry = state.get_mut(authority)?;
            while entry
                .idle
                .front()
                .is_some_and(|c| c.idle_since.elapsed() >= max_age)
            {
                stale.extend(entry.idle.pop_front());
            }
            entry.idle.pop_back()
        };
        self.close_evicted(authority, stale);
        fresh
    }

    fn return_idle(&self, authority: &Authority, connection: C::Connection, id: u64) {
        let mut overflow = Vec::new();
        {
            let mut state = self.lock();
            if let Some(entry) = state.get_mut(authority) {
                entry.idle.push_back(IdleConnection {
                    connection,
                    id,
                    idle_since: Instant::now(),
                });
                while entry.idle.len() > self.config.max_idle {
                    overflow.extend(entry.idle.pop_front());
                }
            }
        }
        self.close_evicted(authority, overflow);
    }

    fn evict_expired(&self) -> usize {
        let max_age = self.config.max_idle_duration;
        let mut expired: Vec<(Authority, IdleConnection<C::Connection>)> = Vec::new();
        {
            let mut state = self.lock();
            for (authority, entry) in state.iter_mut() {
                let before = entry.idle.len();
                let mut kept = VecDeque::with_capacity(before);
                for idle in entry.idle.drain(..) {
                    if idle.idle_since.elapsed() >= max_age {
                        expired.push((authority.clone(), idle));
                    } else {
                        kept.push_back(idle);
                    }
                }
                entry.idle = kept;
            }
        }

        let count = expired.len();
        for (authority, idle) in expired {
            self.close_evicted(&authority, vec![idle]);
        }
        count
    }

    fn close_evicted(&self, authority: &Authority, connections: Vec<IdleConnection<C::Connection>>) {
        for idle in connections {
            tracing::debug!(
                authority = %authority,
                connection_id = idle.id,
                idle_ms = idle.idle_since.elapsed().as_millis() as u64,
                "Closing idle connection"
            );
            self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            drop(idle.connection);
        }
    }
}

/// Shared, cloneable handle to a connection pool
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                state: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// True when both handles point at the same pool
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Check out a connection for `authority`, waiting at most `timeout`
    /// for capacity
    ///
    /// Only the calling task is suspended while waiting. When the timeout
    /// elapses the call fails with [`Error::PoolExhausted`].
    pub async fn acquire(
        &self,
        authority: &Authority,
        timeout: Duration,
    ) -> Result<PooledConnection<C>> {
        let started = Instant::now();
        let permits = self.inner.permits_for(authority);

        let permit = match tokio::time::timeout(timeout, permits.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) | Err(_) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                tracing::warn!(
                    authority = %authority,
                    waited_ms = waited_ms,
                    max_connections = self.inner.config.max_connections,
                    "Connection pool exhausted"
                );
                return Err(Error::PoolExhausted {
                    authority: authority.to_string(),
                    waited_ms,
                });
            }
        };

        if let Some(idle) = self.inner.take_idle(authority) {
            self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(authority = %authority, connection_id = idle.id, "Reusing idle connection");
            return Ok(PooledConnection {
                connection: Some(idle.connection),
                id: idle.id,
                authority: authority.clone(),
                pool: Arc::downgrade(&self.inner),
                _permit: permit,
            });
        }

        // The permit is dropped with the error, freeing the slot
        let connection = self.inner.connector.connect(authority).await?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(authority = %authority, connection_id = id, "Opened new connection");

        Ok(PooledConnection {
            connection: Some(connection),
            id,
            authority: authority.clone(),
            pool: Arc::downgrade(&self.inner),
            _permit: permit,
        })
    }

    /// Return a checked-out connection; unhealthy ones are closed
    pub fn release(&self, connection: PooledConnection<C>, healthy: bool) {
        connection.release(healthy);
    }

    /// Close every idle connection past its max-idle duration
    pub fn evict_idle(&self) -> usize {
        self.inner.evict_expired()
    }

    /// Start the periodic idle reaper on the current tokio runtime
    ///
    /// Returns `None` outside a runtime. The task stops on its own once
    /// the pool is dropped.
    pub fn spawn_reaper(&self) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let pool = Arc::downgrade(&self.inner);
        let period = self.inner.config.reap_interval.max(MIN_REAP_INTERVAL);

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                let evicted = inner.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted = evicted, "Reaped idle connections");
                }
            }
        }))
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            created: c.created.load(Ordering::Relaxed),
            reused: c.reused.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn idle_count(&self, authority: &Authority) -> usize {
        self.inner
            .lock()
            .get(authority)
            .map(|entry| entry.idle.len())
            .unwrap_or(0)
    }

    /// Connections currently checked out for `authority`
    pub fn in_use(&self, authority: &Authority) -> usize {
        let max = self.inner.config.max_connections.max(1);
        self.inner
            .lock()
            .get(authority)
            .map(|entry| max - entry.permits.available_permits())
            .unwrap_or(0)
    }
}

/// A connection checked out of the pool
///
/// Call [`release`](Self::release) when the exchange is over. Dropping the
/// guard without releasing it (for example when the request future is
/// cancelled) closes the connection, since its channel state is unknown.
pub struct PooledConnection<C: Connector> {
    connection: Option<C::Connection>,
    id: u64,
    authority: Authority,
    pool: Weak<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> PooledConnection<C> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Hand the connection back; `healthy == false` closes it
    pub fn release(mut self, healthy: bool) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };

        if healthy {
            pool.return_idle(&self.authority, connection, self.id);
        } else {
            tracing::debug!(
                authority = %self.authority,
                connection_id = self.id,
                "Discarding unhealthy connection"
            );
            pool.counters.discarded.fetch_add(1, Ordering::Relaxed);
            drop(connection);
        }
        // The permit is released when `self` drops, after the connection is idle
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("connection is present until released")
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("connection is present until released")
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!(
                authority = %self.authority,
                connection_id = self.id,
                "Connection dropped while checked out; discarding"
            );
            if let Some(pool) = self.pool.upgrade() {
                pool.counters.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug)]
    struct FakeConnection {
        serial: u64,
    }

    #[derive(Default)]
    struct FakeConnector {
        opened: AtomicU64,
        fail: AtomicBool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        async fn connect(&self, _authority: &Authority) -> Result<FakeConnection> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::transient("connection refused"));
            }
            let serial = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(FakeConnection { serial })
        }
    }

    fn pool(max_connections: usize, max_idle: usize, max_idle_duration: Duration) -> ConnectionPool<FakeConnector> {
        ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig {
                max_connections,
                max_idle,
                acquire_timeout: Duration::from_secs(1),
                max_idle_duration,
                reap_interval: Duration::from_millis(10),
            },
        )
    }

    fn host() -> Authority {
        Authority::new("example.org", None)
    }

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_healthy_connection_is_reused() {
        let pool = pool(2, 2, LONG);

        let conn = pool.acquire(&host(), SHORT).await.unwrap();
        let first = conn.serial;
        pool.release(conn, true);
        assert_eq!(pool.idle_count(&host()), 1);

        let again = pool.acquire(&host(), SHORT).await.unwrap();
        assert_eq!(again.serial, first);
        again.release(true);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_connection_is_discarded() {
        let pool = pool(2, 2, LONG);

        let conn = pool.acquire(&host(), SHORT).await.unwrap();
        conn.release(false);
        assert_eq!(pool.idle_count(&host()), 0);

        let fresh = pool.acquire(&host(), SHORT).await.unwrap();
        assert_eq!(fresh.serial, 2);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_authorities_are_pooled_separately() {
        let pool = pool(1, 1, LONG);
        let other = Authority::new("other.org", Some(8443));

        let a = pool.acquire(&host(), SHORT).await.unwrap();
        let b = pool.acquire(&other, SHORT).await.unwrap();
        assert_eq!(pool.in_use(&host()), 1);
        assert_eq!(pool.in_use(&other), 1);
        a.release(true);
        b.release(true);
        assert_eq!(pool.in_use(&host()), 0);
    }

    #[tokio::test]
    async fn test_clones_share_capacity() {
        let pool = pool(1, 1, LONG);
        let other = pool.clone();
        assert!(pool.ptr_eq(&other));
        assert!(!pool.ptr_eq(&self::pool(1, 1, LONG)));

        let held = pool.acquire(&host(), SHORT).await.unwrap();
        let err = other.acquire(&host(), SHORT).await.err().unwrap();
        assert!(matches!(err, Error::PoolExhausted { .. }));
        drop(held);
    }

    #[tokio::test]
    async fn test_capacity_exhaustion_times_out() {
        let pool = pool(2, 2, LONG);

        let _a = pool.acquire(&host(), SHORT).await.unwrap();
        let _b = pool.acquire(&host(), SHORT).await.unwrap();
        assert_eq!(pool.in_use(&host()), 2);

        let started = Instant::now();
        let third = pool.acquire(&host(), SHORT).await;
        assert!(matches!(third, Err(Error::PoolExhausted { .. })));
        assert!(started.elapsed() >= SHORT);
        assert_eq!(pool.stats().created, 2);
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let pool = pool(1, 1, LONG);
        let held = pool.acquire(&host(), SHORT).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let conn = pool.acquire(&host(), Duration::from_secs(5)).await?;
                let serial = conn.serial;
                conn.release(true);
                Ok::<_, Error>(serial)
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release(true);

        let serial = waiter.await.unwrap().unwrap();
        assert_eq!(serial, 1, "waiter should reuse the released connection");
    }

    #[tokio::test]
    async fn test_concurrent_overcommit_never_deadlocks() {
        let pool = pool(2, 2, LONG);

        let tasks = (0..5).map(|_| {
            let pool = pool.clone();
            async move {
                let conn = pool.acquire(&host(), Duration::from_secs(5)).await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                conn.release(true);
                Ok::<_, Error>(())
            }
        });
        let results = futures::future::join_all(tasks).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(pool.stats().created <= 2);
        assert_eq!(pool.in_use(&host()), 0);
    }

    #[tokio::test]
    async fn test_stale_idle_connection_not_reused() {
        let pool = pool(2, 2, Duration::from_millis(20));

        let conn = pool.acquire(&host(), SHORT).await.unwrap();
        conn.release(true);
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = pool.acquire(&host(), SHORT).await.unwrap();
        assert_eq!(fresh.serial, 2);
        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.reused, 0);
        assert_eq!(stats.evicted, 1);
    }

    #[tokio::test]
    async fn test_reaper_closes_idle_connections() {
        let pool = pool(2, 2, Duration::from_millis(20));
        let reaper = pool.spawn_reaper().expect("inside a runtime");

        let conn = pool.acquire(&host(), SHORT).await.unwrap();
        conn.release(true);
        assert_eq!(pool.idle_count(&host()), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(pool.idle_count(&host()), 0);
        assert_eq!(pool.stats().evicted, 1);

        drop(pool);
        tokio::time::timeout(Duration::from_secs(1), reaper)
            .await
            .expect("reaper stops once the pool is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_idle_set_evicts_oldest() {
        let pool = pool(2, 1, LONG);

        let a = pool.acquire(&host(), SHORT).await.unwrap();
        let b = pool.acquire(&host(), SHORT).await.unwrap();
        let b_serial = b.serial;
        a.release(true);
        b.release(true);

        assert_eq!(pool.idle_count(&host()), 1);
        assert_eq!(pool.stats().evicted, 1);
        let next = pool.acquire(&host(), SHORT).await.unwrap();
        assert_eq!(next.serial, b_serial);
    }

    #[tokio::test]
    async fn test_dropped_checkout_is_discarded() {
        let pool = pool(1, 1, LONG);

        let conn = pool.acquire(&host(), SHORT).await.unwrap();
        drop(conn);

        assert_eq!(pool.idle_count(&host()), 0);
        assert_eq!(pool.in_use(&host()), 0);
        assert_eq!(pool.stats().discarded, 1);
        // Capacity is free again
        assert!(pool.acquire(&host(), SHORT).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_frees_capacity() {
        let pool = pool(1, 1, LONG);
        pool.connector().fail.store(true, Ordering::SeqCst);

        assert!(matches!(
            pool.acquire(&host(), SHORT).await,
            Err(Error::TransientTransport { .. })
        ));
        assert_eq!(pool.in_use(&host()), 0);

        pool.connector().fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire(&host(), SHORT).await.is_ok());
    }
}
