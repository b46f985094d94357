//! The process-wide database registry.
//!
//! A [`Db`] maps names to registered databases, tracks the process default
//! (the first database registered), and hands out per-task [`Session`]s. It
//! is a cheap-to-clone handle; clones share one registry. There is no
//! implicit global: construct one `Db`, pass it around, and shut it down with
//! [`Db::unregister_all`] for test isolation.

use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use crate::proxy::DbProxy;
use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Default)]
struct RegistryState {
    dbs: HashMap<String, Arc<DbProxy>>,
    /// Always a member of `dbs`, or `None` when the registry is empty.
    default: Option<String>,
}

/// Registry of named databases.
#[derive(Clone, Default)]
pub struct Db {
    state: Arc<RwLock<RegistryState>>,
}

impl Db {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a database under a unique name.
    ///
    /// The first database registered becomes the process default. The pool is
    /// created immediately but connections open lazily on first demand.
    pub async fn register(&self, name: &str, config: DatabaseConfig) -> DbResult<()> {
        let url = config.redacted_url();
        let proxy = Arc::new(DbProxy::new(name, config));
        let mut state = self.state.write().await;
        if state.dbs.contains_key(name) {
            return Err(DbError::configuration(format!(
                "db '{name}' already registered"
            )));
        }
        if state.default.is_none() {
            state.default = Some(name.to_string());
        }
        state.dbs.insert(name.to_string(), proxy);
        info!(db = name, url = %url, "database registered");
        Ok(())
    }

    /// Associate a schema alias with a schema name on a registered database.
    pub async fn add_schema(&self, alias: &str, schema: &str, name: &str) -> DbResult<()> {
        let proxy = self.get(name).await.ok_or_else(|| {
            DbError::configuration(format!("db '{name}' not yet registered"))
        })?;
        proxy.add_alias(alias, schema)
    }

    /// Remove a database and shut its pool down.
    ///
    /// If it was the default, an arbitrary remaining database (or none)
    /// becomes the new default.
    pub async fn unregister(&self, name: &str) -> DbResult<()> {
        let proxy = {
            let mut state = self.state.write().await;
            let proxy = state.dbs.remove(name).ok_or_else(|| {
                DbError::configuration(format!("tried to unregister unknown database '{name}'"))
            })?;
            if state.default.as_deref() == Some(name) {
                state.default = state.dbs.keys().next().cloned();
            }
            proxy
        };
        // close connections outside the registry lock
        proxy.shutdown().await;
        info!(db = name, "database unregistered");
        Ok(())
    }

    /// Remove every database and shut all pools down. Idempotent.
    pub async fn unregister_all(&self) {
        let proxies: Vec<Arc<DbProxy>> = {
            let mut state = self.state.write().await;
            state.default = None;
            state.dbs.drain().map(|(_, proxy)| proxy).collect()
        };
        for proxy in &proxies {
            proxy.shutdown().await;
        }
        if !proxies.is_empty() {
            info!(count = proxies.len(), "all databases unregistered");
        }
    }

    /// Whether a database is registered under this name.
    pub async fn contains(&self, name: &str) -> bool {
        self.state.read().await.dbs.contains_key(name)
    }

    /// Look up a registered database.
    pub async fn get(&self, name: &str) -> Option<Arc<DbProxy>> {
        self.state.read().await.dbs.get(name).cloned()
    }

    /// The current default database name, if any.
    pub async fn default_name(&self) -> Option<String> {
        self.state.read().await.default.clone()
    }

    /// Names of all registered databases.
    pub async fn names(&self) -> Vec<String> {
        self.state.read().await.dbs.keys().cloned().collect()
    }

    /// Create a new session against this registry.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Resolve the working database: the caller's selection when it is still
    /// registered and its pool valid, else the process default.
    pub(crate) async fn resolve(&self, selected: Option<&str>) -> DbResult<Arc<DbProxy>> {
        let state = self.state.read().await;
        if let Some(name) = selected {
            match state.dbs.get(name) {
                Some(proxy) if proxy.is_valid() => return Ok(Arc::clone(proxy)),
                _ => {
                    warn!(db = name, "selected database gone, falling back to default");
                }
            }
        }
        state
            .default
            .as_ref()
            .and_then(|name| state.dbs.get(name))
            .cloned()
            .ok_or_else(|| DbError::configuration("no database registered"))
    }

    /// Evict idle connections older than `max_age` from every registered
    /// pool. Returns the total number of connections closed.
    pub async fn evict_idle(&self, max_age: Duration) -> usize {
        let proxies: Vec<Arc<DbProxy>> = {
            let state = self.state.read().await;
            state.dbs.values().cloned().collect()
        };
        let mut evicted = 0;
        for proxy in proxies {
            evicted += proxy.pool().resize_pool(max_age).await;
        }
        evicted
    }

    /// Spawn a background task that periodically evicts idle connections.
    ///
    /// Abort the returned handle to stop the task.
    pub fn start_eviction_task(
        &self,
        interval: Duration,
        max_age: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let db = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                db.evict_idle(max_age).await;
            }
        })
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig::parse("sqlite::memory:").unwrap()
    }

    #[tokio::test]
    async fn test_first_registered_is_default() {
        let db = Db::new();
        db.register("one", memory_config()).await.unwrap();
        db.register("two", memory_config()).await.unwrap();
        assert_eq!(db.default_name().await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let db = Db::new();
        db.register("one", memory_config()).await.unwrap();
        let err = db.register("one", memory_config()).await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_unregister_promotes_default() {
        let db = Db::new();
        db.register("one", memory_config()).await.unwrap();
        db.register("two", memory_config()).await.unwrap();
        db.unregister("one").await.unwrap();
        assert_eq!(db.default_name().await.as_deref(), Some("two"));
        db.unregister("two").await.unwrap();
        assert_eq!(db.default_name().await, None);
    }

    #[tokio::test]
    async fn test_unregister_unknown() {
        let db = Db::new();
        let err = db.unregister("nope").await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_resolve_with_nothing_registered() {
        let db = Db::new();
        let err = db.resolve(None).await.unwrap_err();
        assert!(err.to_string().contains("no database registered"));
    }

    #[tokio::test]
    async fn test_resolve_falls_back_when_selection_invalid() {
        let db = Db::new();
        db.register("main", memory_config()).await.unwrap();
        let proxy = db.resolve(Some("gone")).await.unwrap();
        assert_eq!(proxy.name(), "main");
    }

    #[tokio::test]
    async fn test_add_schema_unknown_db() {
        let db = Db::new();
        let err = db.add_schema("foo", "bar", "nope").await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }
}
