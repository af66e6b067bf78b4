use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{debug, error};
use uuid::Uuid;

use crate::auth::repo_types::{DirectoryEntry, NewUser, User, UserRow};
use crate::db::{DbError, PoolManager};

/// Serializes concurrent `ensure_schema` calls (arbitrary constant).
const SCHEMA_LOCK_KEY: i64 = 0x6e65_6967_6862_6f72;

const USER_COLUMNS: &str = "id, unit_number, email, hashed_password, profile_picture_url, \
     is_directory_opt_in, is_admin, status, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres pool is not initialized")]
    Uninitialized,
    #[error("{0}")]
    Conflict(String),
    #[error("corrupt user row: {0}")]
    CorruptRow(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Uninitialized => StoreError::Uninitialized,
            DbError::Config(e) | DbError::Connect(e) => StoreError::Database(e),
        }
    }
}

/// Persistence for the user entity.
///
/// Lookups return `Ok(None)` for a missing user; `Err` always means the
/// lookup itself failed.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn ensure_schema(&self) -> Result<(), StoreError>;
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// Full-row update of the mutable fields. `Ok(None)` if the id is unknown.
    async fn update(&self, user: &User) -> Result<Option<User>, StoreError>;
    /// Marks the user inactive. Returns whether a row matched.
    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn list_directory(&self) -> Result<Vec<DirectoryEntry>, StoreError>;
}

pub struct PgUserStore {
    pools: Arc<PoolManager>,
    /// Set once the DDL has committed; failed runs leave it empty.
    schema_ready: OnceCell<()>,
}

impl PgUserStore {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self {
            pools,
            schema_ready: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<PgPool, StoreError> {
        Ok(self.pools.current().await?)
    }

    async fn create_schema(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                unit_number VARCHAR NOT NULL,
                email VARCHAR NOT NULL UNIQUE,
                hashed_password VARCHAR NOT NULL,
                profile_picture_url VARCHAR NULL,
                is_directory_opt_in BOOLEAN NOT NULL DEFAULT FALSE,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE,
                status VARCHAR NOT NULL DEFAULT 'active',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users (lower(email))")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_users_directory ON users (is_directory_opt_in, status)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, "failed to ensure users table");
            StoreError::Database(e)
        })?;
        debug!("users schema ensured");
        Ok(())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23505")
}

fn map_write_error(e: sqlx::Error) -> StoreError {
    if is_unique_violation(&e) {
        StoreError::Conflict("email already registered".into())
    } else {
        StoreError::Database(e)
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    User::try_from(row).map_err(StoreError::CorruptRow)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| self.create_schema())
            .await?;
        Ok(())
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let pool = self.pool().await?;
        let id = user.resolved_id();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (
                id, unit_number, email, hashed_password, profile_picture_url,
                is_directory_opt_in, is_admin, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&user.unit_number)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .bind(&user.profile_picture_url)
        .bind(user.is_directory_opt_in)
        .bind(user.is_admin)
        .bind(user.status.as_str())
        .fetch_one(&pool)
        .await
        .map_err(map_write_error)?;
        into_user(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1) LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&pool)
        .await?;
        row.map(into_user).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 LIMIT 1"
        ))
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        row.map(into_user).transpose()
    }

    async fn update(&self, user: &User) -> Result<Option<User>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                unit_number = $2,
                email = $3,
                hashed_password = $4,
                profile_picture_url = $5,
                is_directory_opt_in = $6,
                is_admin = $7,
                status = $8,
                updated_at = GREATEST(NOW(), updated_at)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user.id)
        .bind(&user.unit_number)
        .bind(&user.email)
        .bind(&user.hashed_password)
        .bind(&user.profile_picture_url)
        .bind(user.is_directory_opt_in)
        .bind(user.is_admin)
        .bind(user.status.as_str())
        .fetch_optional(&pool)
        .await
        .map_err(map_write_error)?;
        row.map(into_user).transpose()
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let pool = self.pool().await?;
        let result = sqlx::query(
            r#"
            UPDATE users
            SET status = 'inactive', updated_at = GREATEST(NOW(), updated_at)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_directory(&self) -> Result<Vec<DirectoryEntry>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query_as::<_, DirectoryEntry>(
            r#"
            SELECT id, unit_number, profile_picture_url
            FROM users
            WHERE is_directory_opt_in = TRUE AND status = 'active'
            ORDER BY unit_number ASC
            "#,
        )
        .fetch_all(&pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::UserStatus;
    use crate::config::DbConfig;

    async fn pg_store() -> Option<PgUserStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pools = Arc::new(PoolManager::new(DbConfig {
            database_url: Some(url),
            ..DbConfig::default()
        }));
        pools.acquire().await.expect("acquire test pool");
        let store = PgUserStore::new(pools);
        store.ensure_schema().await.expect("ensure schema");
        Some(store)
    }

    fn unique_email() -> String {
        format!("resident-{}@example.com", Uuid::new_v4().simple())
    }

    #[tokio::test]
    async fn operations_fail_before_pool_is_acquired() {
        let store = PgUserStore::new(Arc::new(PoolManager::new(DbConfig::default())));
        assert!(matches!(
            store.ensure_schema().await,
            Err(StoreError::Uninitialized)
        ));
        assert!(matches!(
            store.find_by_email("a@b.com").await,
            Err(StoreError::Uninitialized)
        ));
        assert!(matches!(
            store.soft_delete(Uuid::new_v4()).await,
            Err(StoreError::Uninitialized)
        ));
        assert!(!store.schema_ready.initialized());
    }

    #[tokio::test]
    async fn ensure_schema_is_safe_to_run_concurrently() {
        let Some(store) = pg_store().await else {
            return;
        };
        // Separate stores share no cache, so each one takes the advisory lock.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let fresh = PgUserStore::new(store.pools.clone());
            handles.push(tokio::spawn(async move {
                fresh.ensure_schema().await?;
                Ok::<_, StoreError>(fresh.schema_ready.initialized())
            }));
        }
        for handle in handles {
            assert!(handle.await.expect("join").expect("ensure schema"));
        }
    }

    #[tokio::test]
    async fn ensure_schema_runs_ddl_once_per_store() {
        let Some(store) = pg_store().await else {
            return;
        };
        assert!(store.schema_ready.initialized());
        // Later calls return without touching the pool.
        store.pools.release().await;
        store.ensure_schema().await.expect("cached ensure schema");
    }

    #[tokio::test]
    async fn insert_lookup_update_and_soft_delete() {
        let Some(store) = pg_store().await else {
            return;
        };
        let email = unique_email();
        let created = store
            .insert(NewUser::resident(email.clone(), "12B".into(), "hash".into()))
            .await
            .expect("insert");
        assert!(created.updated_at >= created.created_at);
        assert_eq!(created.status, UserStatus::Active);

        let by_email = store
            .find_by_email(&email.to_uppercase())
            .await
            .expect("lookup")
            .expect("found");
        assert_eq!(by_email.id, created.id);

        assert!(store
            .find_by_id(Uuid::new_v4())
            .await
            .expect("lookup")
            .is_none());

        let mut changed = by_email.clone();
        changed.is_directory_opt_in = true;
        let updated = store
            .update(&changed)
            .await
            .expect("update")
            .expect("row exists");
        assert!(updated.is_directory_opt_in);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        assert!(store.soft_delete(created.id).await.expect("soft delete"));
        let gone = store
            .find_by_id(created.id)
            .await
            .expect("lookup")
            .expect("row kept");
        assert_eq!(gone.status, UserStatus::Inactive);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let Some(store) = pg_store().await else {
            return;
        };
        let email = unique_email();
        store
            .insert(NewUser::resident(email.clone(), "1".into(), "h".into()))
            .await
            .expect("first insert");
        let err = store
            .insert(NewUser::resident(email.to_uppercase(), "2".into(), "h".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
