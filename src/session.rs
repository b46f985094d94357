//! Per-task sessions and transaction state.
//!
//! A [`Session`] is the unit of confinement: one worker task drives one
//! session, and a physical connection is never shared across concurrent
//! callers. Outside a transaction every statement acquires a connection,
//! executes, and releases it again; `begin_transaction` pins a connection to
//! the session until `commit` or `rollback`, both of which release it back to
//! the pool unconditionally.
//!
//! Any error path that could leave a transaction dangling performs a forced
//! rollback and release before the error is reported.

use crate::error::{DbError, DbResult};
use crate::isolation::TransactionIsolation;
use crate::pool::PooledConn;
use crate::processor::{AllRows, FirstRow, ResultProcessor};
use crate::proxy::DbProxy;
use crate::registry::Db;
use crate::value::SqlValue;
use std::sync::Arc;
use tracing::debug;

struct TxState {
    proxy: Arc<DbProxy>,
    conn: PooledConn,
}

/// A per-task database session.
///
/// Create one per worker task via [`Db::session`]; a session is `Send` but
/// not meant to be shared, all methods take `&mut self`.
pub struct Session {
    db: Db,
    selected: Option<String>,
    tx: Option<TxState>,
    /// Set when a statement on the current connection fails; consulted by the
    /// pool's health probe at release time.
    has_errors: bool,
}

impl Session {
    pub(crate) fn new(db: Db) -> Self {
        Self {
            db,
            selected: None,
            tx: None,
            has_errors: false,
        }
    }

    /// Select the database used by subsequent calls on this session.
    ///
    /// Fails if the name is not registered. The selection falls back to the
    /// process default if the database is later unregistered or shut down.
    pub async fn select(&mut self, name: &str) -> DbResult<()> {
        if !self.db.contains(name).await {
            return Err(DbError::configuration(format!(
                "tried to select unknown database '{name}'"
            )));
        }
        self.selected = Some(name.to_string());
        Ok(())
    }

    /// The currently selected database name, if any.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Whether this session currently holds an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Run a query, feeding each row to `processor` until it stops or rows
    /// are exhausted, and return the processor's accumulated result.
    pub async fn query<P>(
        &mut self,
        mut processor: P,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<P::Output>
    where
        P: ResultProcessor + Send,
    {
        let proxy = self.resolve().await?;
        let sql = proxy.translate(sql);
        self.guard_tx_pool(&proxy).await?;
        debug!(sql = %sql, params = args.len(), "query");

        let result = match self.tx.as_mut() {
            Some(tx) => {
                let r = tx
                    .conn
                    .conn_mut()
                    .query_rows(&sql, args, |row| processor.process(row))
                    .await;
                if r.is_err() {
                    self.has_errors = true;
                }
                r
            }
            None => {
                let mut conn = proxy.pool().acquire().await?;
                self.has_errors = false;
                let r = conn
                    .conn_mut()
                    .query_rows(&sql, args, |row| processor.process(row))
                    .await;
                if r.is_err() {
                    self.has_errors = true;
                }
                proxy.pool().release(conn, self.has_errors).await;
                r
            }
        };
        result.map(|()| processor.into_result())
    }

    /// Run a query and return the first row, reduced to a scalar or list.
    pub async fn query_one(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Option<SqlValue>> {
        self.query(FirstRow::new(), sql, args).await
    }

    /// Run a query and return every row, each reduced to a scalar or list.
    pub async fn query_all(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<SqlValue>> {
        self.query(AllRows::new(), sql, args).await
    }

    /// Execute an update statement and return the number of affected rows.
    pub async fn update(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        let proxy = self.resolve().await?;
        let sql = proxy.translate(sql);
        self.guard_tx_pool(&proxy).await?;
        debug!(sql = %sql, params = args.len(), "update");

        match self.tx.as_mut() {
            Some(tx) => {
                let result = tx.conn.conn_mut().execute(&sql, args).await;
                if result.is_err() {
                    self.has_errors = true;
                }
                result
            }
            None => {
                let mut conn = proxy.pool().acquire().await?;
                self.has_errors = false;
                let result = conn.conn_mut().execute(&sql, args).await;
                if result.is_err() {
                    self.has_errors = true;
                }
                proxy.pool().release(conn, self.has_errors).await;
                result
            }
        }
    }

    /// Execute an insert statement and return the generated key, if any.
    pub async fn insert(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Option<SqlValue>> {
        let proxy = self.resolve().await?;
        let sql = proxy.translate(sql);
        self.guard_tx_pool(&proxy).await?;
        debug!(sql = %sql, params = args.len(), "insert");

        match self.tx.as_mut() {
            Some(tx) => {
                let result = tx.conn.conn_mut().insert(&sql, args).await;
                if result.is_err() {
                    self.has_errors = true;
                }
                result
            }
            None => {
                let mut conn = proxy.pool().acquire().await?;
                self.has_errors = false;
                let result = conn.conn_mut().insert(&sql, args).await;
                if result.is_err() {
                    self.has_errors = true;
                }
                proxy.pool().release(conn, self.has_errors).await;
                result
            }
        }
    }

    /// Begin a transaction, optionally with an isolation level.
    ///
    /// Beginning while already in a transaction is an error; the existing
    /// transaction is rolled back and released before the error is reported.
    pub async fn begin_transaction(
        &mut self,
        isolation: Option<TransactionIsolation>,
    ) -> DbResult<()> {
        if self.tx.is_some() {
            self.abort_transaction().await;
            return Err(DbError::transaction_state(
                "tried to start transaction while already in transaction",
            ));
        }
        let proxy = self.resolve().await?;
        let mut conn = proxy.pool().acquire().await?;
        self.has_errors = false;
        match conn.conn_mut().begin(isolation).await {
            Ok(()) => {
                debug!(db = proxy.name(), "transaction started");
                self.tx = Some(TxState { proxy, conn });
                Ok(())
            }
            Err(e) => {
                self.has_errors = true;
                proxy.pool().release(conn, true).await;
                Err(e)
            }
        }
    }

    /// Commit the current transaction.
    ///
    /// The connection is released back to the pool whether or not the commit
    /// succeeds; a failed commit is preceded by a best-effort rollback.
    pub async fn commit(&mut self) -> DbResult<()> {
        let Some(mut tx) = self.tx.take() else {
            return Err(DbError::transaction_state(
                "tried to commit transaction outside of transaction",
            ));
        };
        let result = tx.conn.conn_mut().commit().await;
        if result.is_err() {
            self.has_errors = true;
            let _ = tx.conn.conn_mut().rollback().await;
        }
        tx.proxy.pool().release(tx.conn, self.has_errors).await;
        debug!(db = tx.proxy.name(), ok = result.is_ok(), "transaction committed");
        result
    }

    /// Roll back the current transaction.
    ///
    /// The connection is released back to the pool whether or not the
    /// rollback succeeds.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let Some(mut tx) = self.tx.take() else {
            return Err(DbError::transaction_state(
                "tried to rollback outside of transaction",
            ));
        };
        let result = tx.conn.conn_mut().rollback().await;
        if result.is_err() {
            self.has_errors = true;
        }
        tx.proxy.pool().release(tx.conn, self.has_errors).await;
        debug!(db = tx.proxy.name(), ok = result.is_ok(), "transaction rolled back");
        result
    }

    /// Resolve the proxy for this session: the selected database if it is
    /// still registered and valid, else the process default.
    async fn resolve(&self) -> DbResult<Arc<DbProxy>> {
        self.db.resolve(self.selected.as_deref()).await
    }

    /// Fail a statement that targets a different pool than the one the open
    /// transaction is bound to. The dangling transaction is rolled back and
    /// released as a side effect.
    async fn guard_tx_pool(&mut self, proxy: &Arc<DbProxy>) -> DbResult<()> {
        let mixed = self
            .tx
            .as_ref()
            .is_some_and(|tx| !Arc::ptr_eq(tx.proxy.pool(), proxy.pool()));
        if mixed {
            self.abort_transaction().await;
            return Err(DbError::transaction_state(
                "tried to mix multiple connections in a single transaction",
            ));
        }
        Ok(())
    }

    /// Forced cleanup: roll the open transaction back, ignoring the outcome,
    /// and return its connection to the pool.
    async fn abort_transaction(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            if tx.conn.conn_mut().rollback().await.is_err() {
                self.has_errors = true;
            }
            tx.proxy.pool().release(tx.conn, self.has_errors).await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("selected", &self.selected)
            .field("in_transaction", &self.in_transaction())
            .field("has_errors", &self.has_errors)
            .finish()
    }
}
