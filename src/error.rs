//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error
//! handling. The variants separate programmer errors (configuration and
//! transaction-state misuse, not retryable) from transient pool exhaustion
//! (retryable with backoff) and driver-level failures (retryable depending on
//! the SQL state).

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Misconfiguration: duplicate registration, unknown database or alias
    /// key, invalid connection URL.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// No connection became available before the acquire deadline.
    #[error("timeout acquiring connection after {waited:?}")]
    PoolTimeout { waited: Duration },

    /// The pool was shut down, either before the call or while waiting.
    #[error("connection pool has been shut down")]
    PoolShutdown,

    /// The wait for a connection was cancelled from outside.
    #[error("interrupted while waiting for a connection")]
    Interrupted,

    /// Transaction lifecycle misuse: begin-while-in-transaction,
    /// commit/rollback outside a transaction, cross-pool mixing.
    #[error("transaction error: {message}")]
    TransactionState { message: String },

    /// Failure surfaced by the underlying database driver.
    #[error("database error: {message}")]
    Driver {
        message: String,
        /// e.g. "42P01" for an undefined table
        sql_state: Option<String>,
    },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transaction-state error.
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }

    /// Create a driver error without an SQL state.
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state: None,
        }
    }

    /// The SQLSTATE code reported by the driver, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is worth retrying after a backoff.
    ///
    /// Configuration and transaction-state errors are programmer errors and
    /// never retryable; a shut-down pool stays shut down.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolTimeout { .. } | Self::Interrupted)
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let sql_state = db_err.code().map(|c| c.to_string());
                DbError::Driver {
                    message: db_err.message().to_string(),
                    sql_state,
                }
            }
            sqlx::Error::Io(io_err) => DbError::driver(format!("I/O error: {io_err}")),
            sqlx::Error::Tls(tls_err) => DbError::driver(format!("TLS error: {tls_err}")),
            sqlx::Error::Protocol(msg) => DbError::driver(format!("protocol error: {msg}")),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::driver(format!("failed to decode column {index}: {source}"))
            }
            sqlx::Error::Decode(source) => DbError::driver(format!("decode error: {source}")),
            sqlx::Error::PoolClosed => DbError::PoolShutdown,
            other => DbError::driver(other.to_string()),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::configuration("db 'main' already registered");
        assert!(err.to_string().contains("configuration error"));

        let err = DbError::PoolTimeout {
            waited: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("timeout acquiring connection"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(
            DbError::PoolTimeout {
                waited: Duration::from_millis(100)
            }
            .is_retryable()
        );
        assert!(DbError::Interrupted.is_retryable());
        assert!(!DbError::configuration("bad").is_retryable());
        assert!(!DbError::transaction_state("no transaction").is_retryable());
        assert!(!DbError::PoolShutdown.is_retryable());
    }

    #[test]
    fn test_sql_state_only_on_driver_errors() {
        let err = DbError::Driver {
            message: "relation does not exist".into(),
            sql_state: Some("42P01".into()),
        };
        assert_eq!(err.sql_state(), Some("42P01"));
        assert_eq!(DbError::PoolShutdown.sql_state(), None);
    }
}
