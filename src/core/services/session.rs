//! Per-token activity tracking: inactivity timeout, concurrent session cap
//! and the periodic sweeps run by the scheduler and the cleanup command.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::core::models::Claims;
use crate::error::{AppError, AppResult};

const USER_AGENT_MAX: usize = 500;

/// Request metadata recorded with each session.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip_address: Option<String>, user_agent: &str) -> Self {
        Self {
            ip_address,
            user_agent: user_agent.chars().take(USER_AGENT_MAX).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub timeout_minutes: i64,
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    /// Username and active session count, busiest first.
    pub top_users: Vec<(String, i64)>,
}

pub struct SessionService;

impl SessionService {
    /// Records activity for the token behind `claims`. A session idle past
    /// the timeout, or one already deactivated, is rejected.
    pub async fn track(
        pool: &SqlitePool,
        claims: &Claims,
        user_id: i64,
        client: &ClientInfo,
        policy: SessionPolicy,
        now: i64,
    ) -> AppResult<()> {
        let existing = sqlx::query("SELECT last_activity, is_active FROM token_activity WHERE token_jti = ?")
            .bind(&claims.jti)
            .fetch_optional(pool)
            .await?;

        match existing {
            Some(row) => {
                let last_activity: i64 = row.try_get("last_activity")?;
                let is_active: bool = row.try_get("is_active")?;
                let idle = now - last_activity > policy.timeout_minutes.saturating_mul(60);
                if idle || !is_active {
                    Self::deactivate(pool, &claims.jti).await?;
                    tracing::info!(
                        "Session {} of user {} rejected (idle: {}, active: {})",
                        claims.jti,
                        user_id,
                        idle,
                        is_active
                    );
                    return Err(AppError::SessionTimeout {
                        timeout_minutes: policy.timeout_minutes,
                    });
                }
                sqlx::query(
                    "UPDATE token_activity SET last_activity = ?, ip_address = ?, user_agent = ?
                     WHERE token_jti = ?",
                )
                .bind(now)
                .bind(&client.ip_address)
                .bind(&client.user_agent)
                .bind(&claims.jti)
                .execute(pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO token_activity
                        (token_jti, user_id, created_at, last_activity, ip_address, user_agent, is_active)
                     VALUES (?, ?, ?, ?, ?, ?, TRUE)
                     ON CONFLICT(token_jti) DO NOTHING",
                )
                .bind(&claims.jti)
                .bind(user_id)
                .bind(now)
                .bind(now)
                .bind(&client.ip_address)
                .bind(&client.user_agent)
                .execute(pool)
                .await?;
            }
        }

        Self::enforce_limit(pool, user_id, &claims.jti, policy.max_sessions).await?;
        Ok(())
    }

    /// Keeps the current session plus the most recently active others, up
    /// to `max_sessions` in total. Returns how many were deactivated.
    pub async fn enforce_limit(
        pool: &SqlitePool,
        user_id: i64,
        current_jti: &str,
        max_sessions: usize,
    ) -> AppResult<u64> {
        let rows = sqlx::query(
            "SELECT token_jti FROM token_activity
             WHERE user_id = ? AND is_active = TRUE
             ORDER BY last_activity DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        if rows.len() <= max_sessions {
            return Ok(0);
        }

        let keep_others = max_sessions.saturating_sub(1);
        let mut deactivated = 0;
        let mut kept = 0;
        for row in rows {
            let jti: String = row.try_get("token_jti")?;
            if jti == current_jti {
                continue;
            }
            if kept < keep_others {
                kept += 1;
                continue;
            }
            Self::deactivate(pool, &jti).await?;
            deactivated += 1;
        }
        if deactivated > 0 {
            tracing::info!(
                "Session limit for user {}: deactivated {} old sessions",
                user_id,
                deactivated
            );
        }
        Ok(deactivated)
    }

    pub async fn deactivate(pool: &SqlitePool, jti: &str) -> AppResult<()> {
        sqlx::query("UPDATE token_activity SET is_active = FALSE WHERE token_jti = ?")
            .bind(jti)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn deactivate_all_for_user(pool: &SqlitePool, user_id: i64) -> AppResult<u64> {
        let result = sqlx::query("UPDATE token_activity SET is_active = FALSE WHERE user_id = ? AND is_active = TRUE")
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Active sessions idle for longer than the timeout become inactive.
    pub async fn mark_idle(pool: &SqlitePool, timeout_minutes: i64, now: i64) -> AppResult<u64> {
        let cutoff = now.saturating_sub(timeout_minutes.saturating_mul(60));
        let result = sqlx::query(
            "UPDATE token_activity SET is_active = FALSE WHERE is_active = TRUE AND last_activity < ?",
        )
        .bind(cutoff)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deletes session rows created before `now - max_age_secs`.
    pub async fn delete_older_than(pool: &SqlitePool, max_age_secs: i64, now: i64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM token_activity WHERE created_at < ?")
            .bind(now.saturating_sub(max_age_secs))
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(pool: &SqlitePool) -> AppResult<SessionStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN is_active THEN 1 ELSE 0 END), 0) AS active
             FROM token_activity",
        )
        .fetch_one(pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let active: i64 = row.try_get("active")?;

        let top_users = sqlx::query(
            "SELECT u.username AS username, COUNT(t.id) AS sessions
             FROM token_activity t JOIN users u ON u.id = t.user_id
             WHERE t.is_active = TRUE
             GROUP BY u.username
             ORDER BY sessions DESC, u.username
             LIMIT 5",
        )
        .fetch_all(pool)
        .await?
        .iter()
        .map(|r| -> AppResult<(String, i64)> {
            Ok((r.try_get("username")?, r.try_get("sessions")?))
        })
        .collect::<AppResult<Vec<_>>>()?;

        Ok(SessionStats {
            total,
            active,
            inactive: total - active,
            top_users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;
    use crate::core::models::TokenType;

    async fn user(pool: &SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "INSERT INTO users (username, email, password_hash, date_joined) VALUES (?, ?, 'x', 0)",
        )
        .bind(name)
        .bind(format!("{}@mail.com", name))
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    fn claims(jti: &str) -> Claims {
        Claims {
            sub: "1".into(),
            username: "ana".into(),
            jti: jti.into(),
            token_type: TokenType::Access,
            iat: 0,
            exp: 0,
        }
    }

    const POLICY: SessionPolicy = SessionPolicy {
        timeout_minutes: 60,
        max_sessions: 3,
    };

    #[tokio::test]
    async fn test_idle_session_times_out() {
        let pool = test_pool().await;
        let uid = user(&pool, "ana").await;
        let client = ClientInfo::new(Some("10.0.0.1".into()), "tests");

        SessionService::track(&pool, &claims("a"), uid, &client, POLICY, 1_000).await.unwrap();
        SessionService::track(&pool, &claims("a"), uid, &client, POLICY, 1_000 + 3_600).await.unwrap();

        let err = SessionService::track(&pool, &claims("a"), uid, &client, POLICY, 1_000 + 7_201)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionTimeout { timeout_minutes: 60 }));

        // stays rejected once deactivated
        let err = SessionService::track(&pool, &claims("a"), uid, &client, POLICY, 1_000 + 7_202)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_limit_keeps_current_and_most_recent() {
        let pool = test_pool().await;
        let uid = user(&pool, "ana").await;
        let client = ClientInfo::default();

        for (i, jti) in ["a", "b", "c", "d"].iter().enumerate() {
            SessionService::track(&pool, &claims(jti), uid, &client, POLICY, 100 + i as i64)
                .await
                .unwrap();
        }
        let active: Vec<String> = sqlx::query("SELECT token_jti FROM token_activity WHERE is_active = TRUE ORDER BY token_jti")
            .fetch_all(&pool)
            .await
            .unwrap()
            .iter()
            .map(|r| r.get("token_jti"))
            .collect();
        assert_eq!(active, vec!["b", "c", "d"]);

        let err = SessionService::track(&pool, &claims("a"), uid, &client, POLICY, 200)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionTimeout { .. }));
    }

    #[tokio::test]
    async fn test_maintenance_and_stats() {
        let pool = test_pool().await;
        let ana = user(&pool, "ana").await;
        let beto = user(&pool, "beto").await;
        let client = ClientInfo::default();

        SessionService::track(&pool, &claims("a1"), ana, &client, POLICY, 0).await.unwrap();
        SessionService::track(&pool, &claims("a2"), ana, &client, POLICY, 5_000).await.unwrap();
        SessionService::track(&pool, &claims("b1"), beto, &client, POLICY, 5_000).await.unwrap();

        assert_eq!(SessionService::mark_idle(&pool, 60, 5_000).await.unwrap(), 1);

        let stats = SessionService::stats(&pool).await.unwrap();
        assert_eq!((stats.total, stats.active, stats.inactive), (3, 2, 1));
        assert_eq!(
            stats.top_users,
            vec![("ana".to_string(), 1), ("beto".to_string(), 1)]
        );

        assert_eq!(SessionService::delete_older_than(&pool, 1_000, 5_000).await.unwrap(), 1);
        assert_eq!(SessionService::deactivate_all_for_user(&pool, ana).await.unwrap(), 1);
    }
}
