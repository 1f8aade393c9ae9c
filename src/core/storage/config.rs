//! Runtime settings and server secrets persisted in the `configs` table.

use crate::core::models::AppConfig;
use crate::error::{AppError, AppResult};
use rand::RngCore;
use sqlx::{Row, SqlitePool};

pub struct ConfigStorage;

impl ConfigStorage {
    /// Stored config, or the defaults (saved on first use).
    pub async fn load(pool: &SqlitePool) -> AppResult<AppConfig> {
        if let Some(value) = Self::get(pool, "app_config").await? {
            let config: AppConfig = serde_json::from_str(&value)
                .map_err(|e| AppError::Unknown(format!("Failed to parse stored config: {}", e)))?;
            if let Err(e) = config.validate() {
                tracing::warn!("Stored configuration is out of range, using defaults: {}", e);
                return Ok(AppConfig::default());
            }
            return Ok(config);
        }

        let default_config = AppConfig::default();
        Self::save(pool, &default_config).await?;
        tracing::info!("Stored default configuration");
        Ok(default_config)
    }

    pub async fn save(pool: &SqlitePool, config: &AppConfig) -> AppResult<()> {
        let content = serde_json::to_string_pretty(config)
            .map_err(|e| AppError::Unknown(format!("Failed to serialize config: {}", e)))?;
        Self::put(pool, "app_config", &content).await
    }

    /// HS256 signing secret: generated once, then reused across restarts so
    /// issued tokens stay valid.
    pub async fn jwt_secret(pool: &SqlitePool) -> AppResult<String> {
        if let Some(secret) = Self::get(pool, "jwt_secret").await? {
            return Ok(secret);
        }
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = hex::encode(bytes);
        Self::put(pool, "jwt_secret", &secret).await?;
        tracing::info!("Generated a new JWT signing secret");
        Ok(secret)
    }

    async fn get(pool: &SqlitePool, key: &str) -> AppResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM configs WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put(pool: &SqlitePool, key: &str, value: &str) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO configs (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
        Ok(())
    }
}
