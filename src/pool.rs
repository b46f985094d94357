//! The bounded connection pool.
//!
//! Connections are opened lazily up to the configured maximum. When the pool
//! is exhausted, acquirers wait on a broadcast notification and recheck
//! availability on every wakeup until a connection frees up or the deadline
//! passes; there is no fairness queue, some waiter proceeds when a connection
//! becomes free. All pool state mutates under a single lock.

use crate::config::DatabaseConfig;
use crate::conn::DbConn;
use crate::error::{DbError, DbResult};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A connection checked out of a [`ConnectionPool`].
///
/// Ownership transfers to the caller at acquire and back to the pool at
/// [`ConnectionPool::release`]; a connection is never used by two callers at
/// once.
#[derive(Debug)]
pub struct PooledConn {
    id: u64,
    conn: DbConn,
}

impl PooledConn {
    pub(crate) fn conn_mut(&mut self) -> &mut DbConn {
        &mut self.conn
    }

    /// The pool-assigned id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A free connection, tagged with the time it was returned to the pool.
struct IdleConn {
    id: u64,
    conn: DbConn,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    /// Free connections in return order: newest at the back (reused first),
    /// oldest at the front (evicted first).
    free: VecDeque<IdleConn>,
    /// Ids of connections currently checked out.
    busy: HashSet<u64>,
}

/// A bounded pool of physical connections to one database.
pub struct ConnectionPool {
    config: DatabaseConfig,
    max_size: usize,
    acquire_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    /// Broadcast on every release and on shutdown.
    released: Notify,
    closed: AtomicBool,
    next_connection_id: AtomicU64,
    // count mirrors, updated under the state lock, for lock-free introspection
    free_count: AtomicUsize,
    busy_count: AtomicUsize,
}

impl ConnectionPool {
    /// Create a new, empty pool; connections open on first demand.
    pub fn new(config: DatabaseConfig) -> Self {
        let options = config.pool_options();
        let max_size = options.max_connections_or_default() as usize;
        let acquire_timeout = options.acquire_timeout();
        debug!(
            url = %config.redacted_url(),
            max = max_size,
            timeout = ?acquire_timeout,
            "connection pool created"
        );
        Self {
            config,
            max_size,
            acquire_timeout,
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            free_count: AtomicUsize::new(0),
            busy_count: AtomicUsize::new(0),
        }
    }

    /// Acquire a connection, waiting up to the configured timeout.
    ///
    /// Fails with [`DbError::PoolShutdown`] on a shut-down pool and
    /// [`DbError::PoolTimeout`] when no connection frees up in time.
    pub async fn acquire(&self) -> DbResult<PooledConn> {
        self.acquire_inner(None).await
    }

    /// Like [`ConnectionPool::acquire`], but the wait can be cancelled from
    /// outside; a cancelled wait fails with [`DbError::Interrupted`].
    pub async fn acquire_with(&self, cancel: &CancellationToken) -> DbResult<PooledConn> {
        self.acquire_inner(Some(cancel)).await
    }

    async fn acquire_inner(&self, cancel: Option<&CancellationToken>) -> DbResult<PooledConn> {
        let deadline = self
            .acquire_timeout
            .map(|t| tokio::time::Instant::now() + t);
        loop {
            // Register for wakeups before checking state so a release between
            // the check and the wait is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if self.closed.load(Ordering::Acquire) {
                    return Err(DbError::PoolShutdown);
                }
                if state.free.is_empty() && state.busy.len() < self.max_size {
                    // lazy growth, serialized under the pool lock
                    let conn = DbConn::connect(&self.config).await?;
                    let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                    state.free.push_back(IdleConn {
                        id,
                        conn,
                        since: Instant::now(),
                    });
                    debug!(connection_id = id, "opened new pooled connection");
                }
                if let Some(idle) = state.free.pop_back() {
                    state.busy.insert(idle.id);
                    self.sync_counts(&state);
                    return Ok(PooledConn {
                        id: idle.id,
                        conn: idle.conn,
                    });
                }
            }

            self.wait_for_release(deadline, cancel, notified).await?;
        }
    }

    /// Block until a release wakes us, the deadline passes, or the caller's
    /// token is cancelled. A wakeup is not a claim; the caller rechecks.
    async fn wait_for_release(
        &self,
        deadline: Option<tokio::time::Instant>,
        cancel: Option<&CancellationToken>,
        notified: std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>,
    ) -> DbResult<()> {
        let timeout_err = || DbError::PoolTimeout {
            waited: self.acquire_timeout.unwrap_or_default(),
        };
        match (deadline, cancel) {
            (Some(deadline), Some(token)) => {
                tokio::select! {
                    _ = token.cancelled() => Err(DbError::Interrupted),
                    woke = tokio::time::timeout_at(deadline, notified) => {
                        woke.map_err(|_| timeout_err())
                    }
                }
            }
            (Some(deadline), None) => tokio::time::timeout_at(deadline, notified)
                .await
                .map_err(|_| timeout_err()),
            (None, Some(token)) => {
                tokio::select! {
                    _ = token.cancelled() => Err(DbError::Interrupted),
                    _ = notified => Ok(()),
                }
            }
            (None, None) => {
                notified.await;
                Ok(())
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// When the last call on the connection had an error, the connection is
    /// probed before being pooled again and discarded if the probe fails.
    /// A connection that does not belong to this pool's busy set is ignored
    /// for counts and closed, since ownership cannot be handed back.
    pub async fn release(&self, conn: PooledConn, had_error: bool) {
        let PooledConn { id, mut conn } = conn;
        {
            let mut state = self.state.lock().await;
            if !state.busy.remove(&id) {
                drop(state);
                if self.closed.load(Ordering::Acquire) {
                    debug!(connection_id = id, "pool shut down, closing released connection");
                } else {
                    warn!(
                        connection_id = id,
                        "released connection does not belong to this pool, closing"
                    );
                }
                conn.close().await;
                return;
            }
            self.sync_counts(&state);
        }

        let shutdown = self.closed.load(Ordering::Acquire);
        let healthy = !shutdown && self.connection_is_ok(&mut conn, had_error).await;

        if healthy {
            let mut state = self.state.lock().await;
            if self.closed.load(Ordering::Acquire) {
                // shutdown raced us between the probe and the re-pool
                drop(state);
                conn.close().await;
            } else {
                state.free.push_back(IdleConn {
                    id,
                    conn,
                    since: Instant::now(),
                });
                self.sync_counts(&state);
            }
        } else {
            if !shutdown {
                warn!(connection_id = id, "discarding unhealthy connection");
            }
            conn.close().await;
        }

        // wake waiters even for a discarded connection, capacity freed up
        self.released.notify_waiters();
    }

    async fn connection_is_ok(&self, conn: &mut DbConn, last_call_had_error: bool) -> bool {
        if !last_call_had_error {
            return true;
        }
        match conn.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "connection probe failed");
                false
            }
        }
    }

    /// Close free connections that have been idle longer than `max_age`,
    /// oldest first. Busy connections are never touched. Returns the number
    /// of connections evicted.
    pub async fn resize_pool(&self, max_age: Duration) -> usize {
        let evicted: Vec<IdleConn> = {
            let mut state = self.state.lock().await;
            let mut evicted = Vec::new();
            while let Some(front) = state.free.front() {
                if front.since.elapsed() < max_age {
                    break;
                }
                if let Some(idle) = state.free.pop_front() {
                    evicted.push(idle);
                }
            }
            self.sync_counts(&state);
            evicted
        };
        let count = evicted.len();
        if count > 0 {
            info!(
                url = %self.config.redacted_url(),
                evicted = count,
                "evicted idle connections"
            );
        }
        for idle in evicted {
            idle.conn.close().await;
        }
        count
    }

    /// Shut the pool down: close all free connections, forget busy ones
    /// (they are closed at their release point), and wake every waiter so it
    /// observes the shutdown instead of hanging. Idempotent.
    pub async fn shutdown(&self) {
        let drained: Vec<IdleConn> = {
            let mut state = self.state.lock().await;
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            state.busy.clear();
            let drained = state.free.drain(..).collect();
            self.sync_counts(&state);
            drained
        };
        info!(url = %self.config.redacted_url(), "connection pool shut down");
        for idle in drained {
            idle.conn.close().await;
        }
        self.released.notify_waiters();
    }

    /// Whether the pool accepts acquisitions.
    pub fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Number of free connections.
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }

    /// Number of checked-out connections.
    pub fn busy_count(&self) -> usize {
        self.busy_count.load(Ordering::Acquire)
    }

    /// The configured maximum pool size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn sync_counts(&self, state: &PoolState) {
        self.free_count.store(state.free.len(), Ordering::Release);
        self.busy_count.store(state.busy.len(), Ordering::Release);
    }
}

/// Renders as `Pool[<url>, 2 free, 4 busy]`, or `Pool[<url>, SHUTDOWN]` once
/// shut down.
impl std::fmt::Display for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pool[{}, ", self.config.redacted_url())?;
        if !self.is_valid() {
            write!(f, "SHUTDOWN]")
        } else {
            write!(f, "{} free, {} busy]", self.free_count(), self.busy_count())
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("url", &self.config.redacted_url())
            .field("max_size", &self.max_size)
            .field("free", &self.free_count())
            .field("busy", &self.busy_count())
            .field("closed", &!self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn memory_pool(size: u32) -> ConnectionPool {
        let config = DatabaseConfig::parse("sqlite::memory:")
            .unwrap()
            .pool_size(size);
        ConnectionPool::new(config)
    }

    #[tokio::test]
    async fn test_new_pool_is_empty_and_valid() {
        let pool = memory_pool(3);
        assert!(pool.is_valid());
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.busy_count(), 0);
        assert_eq!(pool.max_size(), 3);
    }

    #[tokio::test]
    async fn test_display() {
        let pool = memory_pool(2);
        assert_eq!(format!("{pool}"), "Pool[sqlite::memory:, 0 free, 0 busy]");
        pool.shutdown().await;
        assert_eq!(format!("{pool}"), "Pool[sqlite::memory:, SHUTDOWN]");
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let pool = memory_pool(1);
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(!pool.is_valid());
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, DbError::PoolShutdown));
    }
}
