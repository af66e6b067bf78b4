use std::sync::Arc;

use crate::auth::jwt::JwtKeys;
use crate::auth::repo::{PgUserStore, UserStore};
use crate::config::AppConfig;
use crate::db::PoolManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pools: Arc<PoolManager>,
    pub users: Arc<dyn UserStore>,
    pub jwt: JwtKeys,
}

impl AppState {
    /// Builds the state and the shared pool. A connect failure is fatal.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let pools = Arc::new(PoolManager::new(config.db.clone()));
        pools.acquire().await?;

        let users = Arc::new(PgUserStore::new(pools.clone())) as Arc<dyn UserStore>;
        Ok(Self::from_parts(config, pools, users))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        pools: Arc<PoolManager>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let jwt = JwtKeys::new(&config.jwt);
        Self {
            config,
            pools,
            users,
            jwt,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::auth::repo_memory::MemoryUserStore;

        let config = AppConfig::from_lookup(|key| match key {
            "JWT_SECRET" => Some("test-secret".into()),
            "JWT_ISSUER" => Some("test-issuer".into()),
            _ => None,
        })
        .expect("test config");
        let pools = Arc::new(PoolManager::new(config.db.clone()));
        let users = Arc::new(MemoryUserStore::default()) as Arc<dyn UserStore>;
        Self::from_parts(Arc::new(config), pools, users)
    }
}
