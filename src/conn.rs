//! Physical database connections.
//!
//! [`DbConn`] wraps one raw driver connection behind a database-kind enum
//! (no `Any` driver, to keep full type support) and funnels every statement
//! through a single prepare-bind-execute path.
//!
//! # Architecture
//!
//! The per-database submodules provide identical functionality adapted to
//! each database's type system. The code structure is intentionally parallel
//! to make differences obvious. Statements without parameters run as raw SQL
//! rather than prepared statements; some DDL does not support preparation.

use crate::config::{DatabaseConfig, DatabaseType};
use crate::error::{DbError, DbResult};
use crate::isolation::TransactionIsolation;
use crate::value::{SqlRow, SqlValue, ToSqlRow};
use sqlx::{MySqlConnection, PgConnection, SqliteConnection};
use tracing::debug;

/// One physical connection to a database.
pub(crate) enum DbConn {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConn {
    /// Open a new physical connection for the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        use sqlx::Connection;

        debug!(url = %config.redacted_url(), "opening connection");
        match config.kind() {
            DatabaseType::MySql => {
                let conn = MySqlConnection::connect(config.url()).await?;
                Ok(DbConn::MySql(conn))
            }
            DatabaseType::Postgres => {
                let conn = PgConnection::connect(config.url()).await?;
                Ok(DbConn::Postgres(conn))
            }
            DatabaseType::SQLite => {
                use sqlx::ConnectOptions;
                use sqlx::sqlite::SqliteConnectOptions;
                use std::str::FromStr;

                let options =
                    SqliteConnectOptions::from_str(config.url())?.create_if_missing(true);
                let conn = options.connect().await?;
                Ok(DbConn::SQLite(conn))
            }
        }
    }

    /// The backend this connection talks to.
    pub fn kind(&self) -> DatabaseType {
        match self {
            DbConn::MySql(_) => DatabaseType::MySql,
            DbConn::Postgres(_) => DatabaseType::Postgres,
            DbConn::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Lightweight liveness probe.
    pub async fn ping(&mut self) -> DbResult<()> {
        use sqlx::Connection;

        match self {
            DbConn::MySql(c) => c.ping().await.map_err(DbError::from),
            DbConn::Postgres(c) => c.ping().await.map_err(DbError::from),
            DbConn::SQLite(c) => c.ping().await.map_err(DbError::from),
        }
    }

    /// Close the connection, ignoring close failures.
    pub async fn close(self) {
        use sqlx::Connection;

        let result = match self {
            DbConn::MySql(c) => c.close().await,
            DbConn::Postgres(c) => c.close().await,
            DbConn::SQLite(c) => c.close().await,
        };
        if let Err(e) = result {
            debug!(error = %e, "ignoring connection close failure");
        }
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<u64> {
        match self {
            DbConn::MySql(c) => Ok(mysql::execute(c, sql, args).await?.rows_affected()),
            DbConn::Postgres(c) => Ok(postgres::execute(c, sql, args).await?.rows_affected()),
            DbConn::SQLite(c) => Ok(sqlite::execute(c, sql, args).await?.rows_affected()),
        }
    }

    /// Execute an insert and read back the generated key, if any.
    ///
    /// A key row is reduced with the shared row rule: one column yields the
    /// scalar, more yield an ordered list.
    pub async fn insert(&mut self, sql: &str, args: &[SqlValue]) -> DbResult<Option<SqlValue>> {
        match self {
            DbConn::MySql(c) => mysql::insert(c, sql, args).await,
            DbConn::Postgres(c) => postgres::insert(c, sql, args).await,
            DbConn::SQLite(c) => sqlite::insert(c, sql, args).await,
        }
    }

    /// Run a query, feeding each decoded row to `on_row` in query order until
    /// it returns `false` or rows are exhausted.
    pub async fn query_rows<F>(&mut self, sql: &str, args: &[SqlValue], on_row: F) -> DbResult<()>
    where
        F: FnMut(SqlRow) -> DbResult<bool> + Send,
    {
        match self {
            DbConn::MySql(c) => mysql::fetch_rows(c, sql, args, on_row).await,
            DbConn::Postgres(c) => postgres::fetch_rows(c, sql, args, on_row).await,
            DbConn::SQLite(c) => sqlite::fetch_rows(c, sql, args, on_row).await,
        }
    }

    /// Begin a transaction, optionally with an isolation level.
    ///
    /// SQLite ignores the level; its transactions are always serializable.
    pub async fn begin(&mut self, isolation: Option<TransactionIsolation>) -> DbResult<()> {
        use sqlx::Executor;

        match self {
            // MySQL: SET TRANSACTION applies to the *next* transaction
            DbConn::MySql(c) => {
                if let Some(level) = isolation {
                    let set = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
                    (&mut *c).execute(set.as_str()).await?;
                }
                (&mut *c).execute("BEGIN").await?;
            }
            // PostgreSQL: SET TRANSACTION must run inside the transaction
            DbConn::Postgres(c) => {
                (&mut *c).execute("BEGIN").await?;
                if let Some(level) = isolation {
                    let set = format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql());
                    (&mut *c).execute(set.as_str()).await?;
                }
            }
            DbConn::SQLite(c) => {
                (&mut *c).execute("BEGIN").await?;
            }
        }
        Ok(())
    }

    /// Commit the current transaction.
    pub async fn commit(&mut self) -> DbResult<()> {
        use sqlx::Executor;

        match self {
            DbConn::MySql(c) => {
                (&mut *c).execute("COMMIT").await?;
            }
            DbConn::Postgres(c) => {
                (&mut *c).execute("COMMIT").await?;
            }
            DbConn::SQLite(c) => {
                (&mut *c).execute("COMMIT").await?;
            }
        }
        Ok(())
    }

    /// Roll back the current transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        use sqlx::Executor;

        match self {
            DbConn::MySql(c) => {
                (&mut *c).execute("ROLLBACK").await?;
            }
            DbConn::Postgres(c) => {
                (&mut *c).execute("ROLLBACK").await?;
            }
            DbConn::SQLite(c) => {
                (&mut *c).execute("ROLLBACK").await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DbConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DbConn({})", self.kind())
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use futures_util::TryStreamExt;
    use sqlx::Executor;
    use sqlx::mysql::{MySqlArguments, MySqlQueryResult};

    pub async fn execute(
        conn: &mut MySqlConnection,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<MySqlQueryResult> {
        if args.is_empty() {
            return conn.execute(sql).await.map_err(DbError::from);
        }
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_param(query, arg)?;
        }
        query.execute(conn).await.map_err(DbError::from)
    }

    pub async fn insert(
        conn: &mut MySqlConnection,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<Option<SqlValue>> {
        let result = execute(conn, sql, args).await?;
        match result.last_insert_id() {
            0 => Ok(None),
            id => Ok(Some(SqlValue::Int(id as i64))),
        }
    }

    pub async fn fetch_rows<F>(
        conn: &mut MySqlConnection,
        sql: &str,
        args: &[SqlValue],
        mut on_row: F,
    ) -> DbResult<()>
    where
        F: FnMut(SqlRow) -> DbResult<bool> + Send,
    {
        if args.is_empty() {
            let mut stream = conn.fetch(sql);
            while let Some(row) = stream.try_next().await? {
                if !on_row(row.to_sql_row())? {
                    break;
                }
            }
            return Ok(());
        }
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_param(query, arg)?;
        }
        let mut stream = query.fetch(&mut *conn);
        while let Some(row) = stream.try_next().await? {
            if !on_row(row.to_sql_row())? {
                break;
            }
        }
        Ok(())
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q SqlValue,
    ) -> DbResult<sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>> {
        Ok(match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
            SqlValue::List(_) => {
                return Err(DbError::configuration(
                    "a list value cannot be bound as a statement parameter",
                ));
            }
        })
    }
}

mod postgres {
    use super::*;
    use futures_util::TryStreamExt;
    use sqlx::Executor;
    use sqlx::postgres::{PgArguments, PgQueryResult};

    pub async fn execute(
        conn: &mut PgConnection,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<PgQueryResult> {
        if args.is_empty() {
            return conn.execute(sql).await.map_err(DbError::from);
        }
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_param(query, arg)?;
        }
        query.execute(conn).await.map_err(DbError::from)
    }

    // PostgreSQL has no generated-key channel; the key comes back as the
    // statement's returned row when the insert uses RETURNING.
    pub async fn insert(
        conn: &mut PgConnection,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<Option<SqlValue>> {
        let row = if args.is_empty() {
            conn.fetch_optional(sql).await?
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = bind_param(query, arg)?;
            }
            query.fetch_optional(conn).await?
        };
        Ok(row.map(|r| r.to_sql_row().reduce()))
    }

    pub async fn fetch_rows<F>(
        conn: &mut PgConnection,
        sql: &str,
        args: &[SqlValue],
        mut on_row: F,
    ) -> DbResult<()>
    where
        F: FnMut(SqlRow) -> DbResult<bool> + Send,
    {
        if args.is_empty() {
            let mut stream = conn.fetch(sql);
            while let Some(row) = stream.try_next().await? {
                if !on_row(row.to_sql_row())? {
                    break;
                }
            }
            return Ok(());
        }
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_param(query, arg)?;
        }
        let mut stream = query.fetch(&mut *conn);
        while let Some(row) = stream.try_next().await? {
            if !on_row(row.to_sql_row())? {
                break;
            }
        }
        Ok(())
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q SqlValue,
    ) -> DbResult<sqlx::query::Query<'q, sqlx::Postgres, PgArguments>> {
        Ok(match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
            SqlValue::List(_) => {
                return Err(DbError::configuration(
                    "a list value cannot be bound as a statement parameter",
                ));
            }
        })
    }
}

mod sqlite {
    use super::*;
    use futures_util::TryStreamExt;
    use sqlx::Executor;
    use sqlx::sqlite::{SqliteArguments, SqliteQueryResult};

    pub async fn execute(
        conn: &mut SqliteConnection,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<SqliteQueryResult> {
        if args.is_empty() {
            return conn.execute(sql).await.map_err(DbError::from);
        }
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_param(query, arg)?;
        }
        query.execute(conn).await.map_err(DbError::from)
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        sql: &str,
        args: &[SqlValue],
    ) -> DbResult<Option<SqlValue>> {
        let result = execute(conn, sql, args).await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(SqlValue::Int(result.last_insert_rowid())))
    }

    pub async fn fetch_rows<F>(
        conn: &mut SqliteConnection,
        sql: &str,
        args: &[SqlValue],
        mut on_row: F,
    ) -> DbResult<()>
    where
        F: FnMut(SqlRow) -> DbResult<bool> + Send,
    {
        if args.is_empty() {
            let mut stream = conn.fetch(sql);
            while let Some(row) = stream.try_next().await? {
                if !on_row(row.to_sql_row())? {
                    break;
                }
            }
            return Ok(());
        }
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_param(query, arg)?;
        }
        let mut stream = query.fetch(&mut *conn);
        while let Some(row) = stream.try_next().await? {
            if !on_row(row.to_sql_row())? {
                break;
            }
        }
        Ok(())
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        param: &'q SqlValue,
    ) -> DbResult<sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>> {
        Ok(match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Blob(v) => query.bind(v.as_slice()),
            SqlValue::List(_) => {
                return Err(DbError::configuration(
                    "a list value cannot be bound as a statement parameter",
                ));
            }
        })
    }
}
