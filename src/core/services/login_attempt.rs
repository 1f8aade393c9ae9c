//! Login attempt log backing the rate limit, with opportunistic cleanup.

use sqlx::{Row, SqlitePool};

use crate::error::AppResult;

pub const MAINTENANCE_MARKER: &str = "__maintenance__";
const CLEANUP_INTERVAL_SECS: i64 = 24 * 3600;

pub struct LoginAttemptService;

impl LoginAttemptService {
    pub async fn record(
        pool: &SqlitePool,
        identifier: &str,
        successful: bool,
        now: i64,
    ) -> AppResult<()> {
        sqlx::query("INSERT INTO login_attempts (identifier, successful, created_at) VALUES (?, ?, ?)")
            .bind(identifier.to_lowercase())
            .bind(successful)
            .bind(now)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Failures for `identifier` since `now - window_secs`.
    pub async fn recent_failures(
        pool: &SqlitePool,
        identifier: &str,
        window_secs: i64,
        now: i64,
    ) -> AppResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM login_attempts
             WHERE identifier = ? AND successful = FALSE AND created_at >= ?",
        )
        .bind(identifier.to_lowercase())
        .bind(now - window_secs)
        .fetch_one(pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Purges old rows at most once per day, tracked by a marker row.
    /// Returns the number of deleted rows, 0 when skipped.
    pub async fn check_attempts(pool: &SqlitePool, retention_days: i64, now: i64) -> AppResult<u64> {
        let last_cleanup: Option<i64> = sqlx::query(
            "SELECT MAX(last_cleanup_at) AS last FROM login_attempts WHERE last_cleanup_at IS NOT NULL",
        )
        .fetch_one(pool)
        .await?
        .try_get("last")?;

        if matches!(last_cleanup, Some(at) if now - at < CLEANUP_INTERVAL_SECS) {
            return Ok(0);
        }

        let mut tx = pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM login_attempts WHERE created_at < ?")
            .bind(now.saturating_sub(retention_days.saturating_mul(86400)))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(
            "INSERT INTO login_attempts (identifier, successful, created_at, last_cleanup_at)
             VALUES (?, TRUE, ?, ?)",
        )
        .bind(MAINTENANCE_MARKER)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if deleted > 0 {
            tracing::info!("Login attempt cleanup removed {} rows", deleted);
        }
        Ok(deleted)
    }

    /// Unconditional purge used by the `purge-login-attempts` command.
    pub async fn purge(pool: &SqlitePool, retention_days: i64, now: i64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE created_at < ?")
            .bind(now.saturating_sub(retention_days.saturating_mul(86400)))
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;

    const DAY: i64 = 86400;

    #[tokio::test]
    async fn test_recent_failures_window() {
        let pool = test_pool().await;
        LoginAttemptService::record(&pool, "Ana", false, 100).await.unwrap();
        LoginAttemptService::record(&pool, "ana", false, 1_000).await.unwrap();
        LoginAttemptService::record(&pool, "ana", true, 1_001).await.unwrap();
        LoginAttemptService::record(&pool, "beto", false, 1_001).await.unwrap();

        assert_eq!(
            LoginAttemptService::recent_failures(&pool, "ANA", 900, 1_010).await.unwrap(),
            1
        );
        assert_eq!(
            LoginAttemptService::recent_failures(&pool, "ana", 1_000, 1_010).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_check_attempts_runs_once_per_day() {
        let pool = test_pool().await;
        let now = 100 * DAY;
        LoginAttemptService::record(&pool, "ana", false, now - 40 * DAY).await.unwrap();
        LoginAttemptService::record(&pool, "ana", false, now - DAY).await.unwrap();

        assert_eq!(LoginAttemptService::check_attempts(&pool, 30, now).await.unwrap(), 1);

        LoginAttemptService::record(&pool, "ana", false, now - 50 * DAY).await.unwrap();
        assert_eq!(
            LoginAttemptService::check_attempts(&pool, 30, now + 3600).await.unwrap(),
            0
        );
        assert_eq!(
            LoginAttemptService::check_attempts(&pool, 30, now + DAY).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_purge() {
        let pool = test_pool().await;
        let now = 100 * DAY;
        LoginAttemptService::record(&pool, "ana", false, now - 31 * DAY).await.unwrap();
        LoginAttemptService::record(&pool, "ana", true, now - 29 * DAY).await.unwrap();
        assert_eq!(LoginAttemptService::purge(&pool, 30, now).await.unwrap(), 1);
    }
}
