use std::{
    str::FromStr,
    sync::atomic::{AtomicUsize, Ordering},
};

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::DbConfig;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("postgres pool is not initialized")]
    Uninitialized,
    #[error("invalid database configuration: {0}")]
    Config(#[source] sqlx::Error),
    #[error("failed to connect to postgres: {0}")]
    Connect(#[source] sqlx::Error),
}

/// Owns the process-wide Postgres pool.
///
/// The pool is built on the first `acquire` and shared afterwards. Construction
/// runs under the write lock with a re-check, so concurrent first callers end
/// up with the same pool.
pub struct PoolManager {
    config: DbConfig,
    pool: RwLock<Option<PgPool>>,
    builds: AtomicUsize,
    /// Build pools without opening a connection.
    lazy: bool,
}

impl PoolManager {
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
            builds: AtomicUsize::new(0),
            lazy: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn lazy(config: DbConfig) -> Self {
        Self {
            lazy: true,
            ..Self::new(config)
        }
    }

    pub async fn acquire(&self) -> Result<PgPool, DbError> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }

        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self.build().await?;
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Returns the pool if `acquire` already succeeded.
    pub async fn current(&self) -> Result<PgPool, DbError> {
        self.pool
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(DbError::Uninitialized)
    }

    /// Closes the pool; a later `acquire` builds a fresh one.
    pub async fn release(&self) {
        let taken = self.pool.write().await.take();
        if let Some(pool) = taken {
            pool.close().await;
            info!(pools_built = self.init_count(), "postgres pool closed");
        }
    }

    /// Number of pools this manager has constructed.
    pub fn init_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_options(&self) -> Result<PgConnectOptions, DbError> {
        let cfg = &self.config;
        if let Some(url) = cfg.database_url.as_deref() {
            return PgConnectOptions::from_str(url).map_err(DbError::Config);
        }
        let ssl_mode = PgSslMode::from_str(&cfg.ssl_mode).map_err(DbError::Config)?;
        let mut opts = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .database(&cfg.database)
            .ssl_mode(ssl_mode);
        if !cfg.password.is_empty() {
            opts = opts.password(&cfg.password);
        }
        Ok(opts)
    }

    async fn build(&self) -> Result<PgPool, DbError> {
        let cfg = &self.config;
        let opts = self.connect_options()?;
        let options = PgPoolOptions::new()
            .min_connections(cfg.min_connections)
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.connect_timeout);
        let pool = if self.lazy {
            options.connect_lazy_with(opts)
        } else {
            options.connect_with(opts).await.map_err(|e| {
                error!(error = %e, "postgres pool connect failed");
                DbError::Connect(e)
            })?
        };

        self.builds.fetch_add(1, Ordering::SeqCst);
        if cfg.database_url.is_some() {
            info!(
                min = cfg.min_connections,
                max = cfg.max_connections,
                "connected to postgres via DATABASE_URL"
            );
        } else {
            info!(
                host = %cfg.host,
                port = cfg.port,
                db = %cfg.database,
                min = cfg.min_connections,
                max = cfg.max_connections,
                "connected to postgres"
            );
        }
        Ok(pool)
    }
}
