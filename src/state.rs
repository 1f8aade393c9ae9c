use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::auth::jwt::JwtKeys;
use crate::core::cache::TtlCache;
use crate::core::models::{AppConfig, Gasto};
use crate::core::storage::ConfigStorage;
use crate::core::traits::{DefaultStorageConfig, StorageConfig};
use crate::error::AppResult;

const UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Shared state of the web server.
pub struct AppState {
    pub storage: DefaultStorageConfig,
    pub db_pool: SqlitePool,
    pub config: RwLock<AppConfig>,
    pub jwt: JwtKeys,
    /// Unfiltered expense list per user id
    pub gastos_cache: TtlCache<i64, Vec<Gasto>>,
    /// Drives the periodic session sweep in the auth middleware
    pub request_counter: AtomicU64,
    pub http: reqwest::Client,
    /// Removed from disk when the state is dropped
    #[cfg(test)]
    test_dir: Option<tempfile::TempDir>,
}

impl AppState {
    pub async fn new(jwt_secret: Option<String>) -> AppResult<Self> {
        let storage = DefaultStorageConfig::new()?;
        let db_pool = crate::core::db::init_db(&storage.data_dir()).await?;
        Self::from_parts(storage, db_pool, jwt_secret).await
    }

    pub async fn with_data_dir(data_dir: PathBuf, jwt_secret: Option<String>) -> AppResult<Self> {
        let storage = DefaultStorageConfig::with_path(data_dir)?;
        let db_pool = crate::core::db::init_db(&storage.data_dir()).await?;
        Self::from_parts(storage, db_pool, jwt_secret).await
    }

    /// An explicit secret wins over the one persisted in the database.
    async fn from_parts(
        storage: DefaultStorageConfig,
        db_pool: SqlitePool,
        jwt_secret: Option<String>,
    ) -> AppResult<Self> {
        let config = ConfigStorage::load(&db_pool).await?;
        let secret = match jwt_secret.filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => ConfigStorage::jwt_secret(&db_pool).await?,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            storage,
            db_pool,
            gastos_cache: TtlCache::new(Duration::from_secs(config.gastos_cache_seconds)),
            config: RwLock::new(config),
            jwt: JwtKeys::new(&secret),
            request_counter: AtomicU64::new(0),
            http,
            #[cfg(test)]
            test_dir: None,
        })
    }

    /// Persists and applies a new configuration.
    pub async fn update_config(&self, config: AppConfig) -> AppResult<()> {
        config.validate()?;
        ConfigStorage::save(&self.db_pool, &config).await?;
        self.gastos_cache
            .set_ttl(Duration::from_secs(config.gastos_cache_seconds));
        *self.config.write().await = config;
        Ok(())
    }

    pub fn invalidate_gastos(&self, user_id: i64) {
        self.gastos_cache.invalidate(&user_id);
    }

    #[cfg(test)]
    pub(crate) async fn for_tests() -> Arc<Self> {
        let dir = tempfile::tempdir().unwrap();
        let storage = DefaultStorageConfig::with_path(dir.path().to_path_buf()).unwrap();
        let pool = crate::core::db::test_pool().await;
        let mut state = Self::from_parts(storage, pool, Some("test-secret".to_string()))
            .await
            .unwrap();
        state.test_dir = Some(dir);
        Arc::new(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_dir_lives_as_long_as_the_state() {
        let state = AppState::for_tests().await;
        let dir = state.storage.data_dir();
        assert!(dir.join("logs").is_dir());

        drop(state);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid_values() {
        let state = AppState::for_tests().await;
        let bad = AppConfig {
            default_page_size: 0,
            ..AppConfig::default()
        };
        assert!(state.update_config(bad).await.is_err());
        assert_eq!(state.config.read().await.default_page_size, 10);
    }
}
