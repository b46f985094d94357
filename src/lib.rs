//! Pooled database access with per-task transaction management.
//!
//! `sqlgate` manages named databases (SQLite, PostgreSQL, MySQL), each backed
//! by a bounded connection pool with lazy growth, blocking acquisition with
//! timeout, health-checked release and idle eviction. Statements run through
//! per-task [`Session`]s that keep transaction state confined to one worker,
//! and query text passes a schema-alias rewriter before execution.
//!
//! ```no_run
//! # async fn demo() -> sqlgate::DbResult<()> {
//! use sqlgate::{Db, DatabaseConfig, params};
//!
//! let db = Db::new();
//! db.register("main", DatabaseConfig::parse("sqlite:app.db?max_connections=4")?)
//!     .await?;
//! db.add_schema("app", "main", "main").await?;
//!
//! let mut session = db.session();
//! session.update("create table if not exists t(a, b)", params![]).await?;
//! session.begin_transaction(None).await?;
//! session.insert("insert into t values (?, ?)", params!["x", "y"]).await?;
//! session.commit().await?;
//! let rows = session.query_all("select * from t", params![]).await?;
//! # let _ = rows;
//! db.unregister_all().await;
//! # Ok(())
//! # }
//! ```

pub mod alias;
pub mod config;
mod conn;
pub mod error;
pub mod isolation;
pub mod pool;
pub mod processor;
pub mod proxy;
pub mod registry;
pub mod session;
pub mod value;

pub use config::{DatabaseConfig, DatabaseType, PoolOptions};
pub use error::{DbError, DbResult};
pub use isolation::TransactionIsolation;
pub use pool::{ConnectionPool, PooledConn};
pub use processor::{AllRows, FirstRow, ResultProcessor};
pub use proxy::DbProxy;
pub use registry::Db;
pub use session::Session;
pub use value::{SqlRow, SqlValue};
