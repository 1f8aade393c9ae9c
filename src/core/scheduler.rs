use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use crate::core::models::AppConfig;
use crate::core::services::{LoginAttemptService, SessionService, TokenService};
use crate::error::AppResult;
use crate::state::AppState;

const INTERVAL_SECS: u64 = 600;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MaintenanceReport {
    pub idle_sessions: u64,
    pub deleted_sessions: u64,
    pub login_attempts: u64,
    pub blacklist: u64,
}

/// One maintenance pass over sessions, login attempts and the refresh
/// token blacklist.
pub async fn run_maintenance(
    pool: &SqlitePool,
    config: &AppConfig,
    now: i64,
) -> AppResult<MaintenanceReport> {
    Ok(MaintenanceReport {
        idle_sessions: SessionService::mark_idle(pool, config.session_timeout_minutes, now).await?,
        deleted_sessions: SessionService::delete_older_than(
            pool,
            config.session_retention_hours.saturating_mul(3600),
            now,
        )
        .await?,
        login_attempts: LoginAttemptService::check_attempts(pool, config.login_retention_days, now)
            .await?,
        blacklist: TokenService::purge_blacklist(pool, now).await?,
    })
}

pub fn start_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        info!("Maintenance scheduler started, running every {}s", INTERVAL_SECS);

        let mut interval = time::interval(Duration::from_secs(INTERVAL_SECS));

        loop {
            interval.tick().await;

            let config = state.config.read().await.clone();
            match run_maintenance(&state.db_pool, &config, Utc::now().timestamp()).await {
                Ok(report) if report == MaintenanceReport::default() => {
                    debug!("[Scheduler] nothing to clean up");
                }
                Ok(report) => {
                    info!(
                        "[Scheduler] {} idle sessions closed, {} old sessions deleted, {} login attempts purged, {} blacklist rows purged",
                        report.idle_sessions,
                        report.deleted_sessions,
                        report.login_attempts,
                        report.blacklist
                    );
                }
                Err(e) => warn!("[Scheduler] maintenance failed: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;
    use crate::core::models::{Claims, TokenType};
    use crate::core::services::medio_pago::tests::insert_user;
    use crate::core::services::{ClientInfo, SessionPolicy};

    #[tokio::test]
    async fn test_maintenance_pass() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let config = AppConfig::default();
        let policy = SessionPolicy {
            timeout_minutes: config.session_timeout_minutes,
            max_sessions: config.max_sessions_per_user,
        };
        let claims = Claims {
            sub: ana.to_string(),
            username: "ana".into(),
            jti: "old".into(),
            token_type: TokenType::Access,
            iat: 0,
            exp: 0,
        };
        SessionService::track(&pool, &claims, ana, &ClientInfo::default(), policy, 1_000)
            .await
            .unwrap();

        let now = 1_000 + config.session_retention_hours * 3600 + 1;
        let report = run_maintenance(&pool, &config, now).await.unwrap();
        assert_eq!(report.idle_sessions, 1);
        assert_eq!(report.deleted_sessions, 1);

        let again = run_maintenance(&pool, &config, now + 60).await.unwrap();
        assert_eq!(again, MaintenanceReport::default());
    }
}
