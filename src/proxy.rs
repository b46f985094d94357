//! Per-database facade.
//!
//! A [`DbProxy`] binds one registered name to its connection pool and its
//! schema-alias translator. Sessions resolve a proxy through the registry and
//! run every statement's query text through [`DbProxy::translate`] before it
//! reaches a connection.

use crate::alias::SchemaAliasTranslator;
use crate::config::DatabaseConfig;
use crate::error::DbResult;
use crate::pool::ConnectionPool;
use std::sync::Arc;

pub struct DbProxy {
    name: String,
    pool: Arc<ConnectionPool>,
    translator: SchemaAliasTranslator,
}

impl DbProxy {
    pub(crate) fn new(name: impl Into<String>, config: DatabaseConfig) -> Self {
        Self {
            name: name.into(),
            pool: Arc::new(ConnectionPool::new(config)),
            translator: SchemaAliasTranslator::new(),
        }
    }

    /// The registry key of this database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The pool backing this database.
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Register a schema alias; duplicate aliases are a configuration error.
    pub fn add_alias(&self, alias: &str, schema: &str) -> DbResult<()> {
        self.translator.add_alias(alias, schema)
    }

    /// Resolve all registered schema aliases in a query.
    pub fn translate(&self, query: &str) -> String {
        self.translator.translate(query)
    }

    /// Whether this proxy's pool still accepts work.
    pub fn is_valid(&self) -> bool {
        self.pool.is_valid()
    }

    /// Shut down the underlying pool.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl std::fmt::Debug for DbProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbProxy")
            .field("name", &self.name)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
