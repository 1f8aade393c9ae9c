//! Login, refresh rotation and logout on top of the JWT keys, the refresh
//! token blacklist and the login rate limit.

use chrono::Duration;
use sqlx::{Row, SqlitePool};

use super::{LoginAttemptService, SessionService, UserService};
use crate::auth::jwt::{fingerprint, JwtKeys, TokenLifetimes, TOKEN_NOT_VALID};
use crate::auth::password::verify_password;
use crate::core::models::{AppConfig, Claims, LoginInput, TokenPair, TokenType};
use crate::core::validation::{Validator, REQUIRED};
use crate::error::{AppError, AppResult};

pub struct TokenService;

impl TokenService {
    /// Fails instead of minting tokens with an unrepresentable or
    /// non-positive lifetime.
    pub fn lifetimes(config: &AppConfig) -> AppResult<TokenLifetimes> {
        let access = Duration::try_minutes(config.access_token_minutes)
            .filter(|d| *d > Duration::zero());
        let refresh = Duration::try_hours(config.refresh_token_hours)
            .filter(|d| *d > Duration::zero());
        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok(TokenLifetimes { access, refresh }),
            _ => Err(AppError::Unknown(format!(
                "invalid token lifetimes: {} min / {} h",
                config.access_token_minutes, config.refresh_token_hours
            ))),
        }
    }

    pub async fn login(
        pool: &SqlitePool,
        keys: &JwtKeys,
        config: &AppConfig,
        input: &LoginInput,
        now: i64,
    ) -> AppResult<TokenPair> {
        let identifier = input.username.as_deref().map(str::trim).unwrap_or_default();
        let password = input.password.as_deref().unwrap_or_default();
        if identifier.is_empty() || password.is_empty() {
            let mut v = Validator::new();
            if identifier.is_empty() {
                v.error("username", REQUIRED);
            }
            if password.is_empty() {
                v.error("password", REQUIRED);
            }
            return Err(v.into_error());
        }

        if let Err(e) = LoginAttemptService::check_attempts(pool, config.login_retention_days, now).await {
            tracing::warn!("Login attempt cleanup failed: {}", e);
        }

        let failures = LoginAttemptService::recent_failures(
            pool,
            identifier,
            config.login_window_minutes.saturating_mul(60),
            now,
        )
        .await?;
        if failures >= config.login_max_attempts {
            tracing::warn!("Login rate limit reached for {}", identifier);
            return Err(AppError::TooManyRequests {
                detail: format!(
                    "Demasiados intentos fallidos. Intente nuevamente en {} minutos.",
                    config.login_window_minutes
                ),
                code: "too_many_attempts",
            });
        }

        let user = match UserService::find_by_login(pool, identifier).await? {
            Some(user) => user,
            None => {
                LoginAttemptService::record(pool, identifier, false, now).await?;
                return Err(AppError::unauthorized(
                    "No existe una cuenta con ese usuario o email.",
                    "user_not_found",
                ));
            }
        };
        if !verify_password(password, &user.password_hash) {
            LoginAttemptService::record(pool, identifier, false, now).await?;
            return Err(AppError::unauthorized("Contraseña incorrecta.", "bad_password"));
        }

        LoginAttemptService::record(pool, identifier, true, now).await?;
        UserService::touch_login(pool, user.id, now).await?;
        let (pair, _) = keys.issue_pair(user.id, &user.username, Self::lifetimes(config)?, now)?;
        tracing::info!("User {} logged in", user.username);
        Ok(pair)
    }

    /// Rotates the refresh token: the presented one is blacklisted and a new
    /// pair is issued.
    pub async fn refresh(
        pool: &SqlitePool,
        keys: &JwtKeys,
        config: &AppConfig,
        refresh: Option<&str>,
        now: i64,
    ) -> AppResult<TokenPair> {
        let refresh = refresh
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::field("refresh", REQUIRED))?;
        let claims = Self::verify_refresh(pool, keys, refresh).await?;
        let user_id = claims
            .user_id()
            .ok_or_else(|| AppError::unauthorized("Token is invalid", TOKEN_NOT_VALID))?;
        // deleted accounts cannot refresh
        let user = UserService::get(pool, user_id)
            .await
            .map_err(|_| AppError::unauthorized("User not found", TOKEN_NOT_VALID))?;

        Self::blacklist(pool, &claims, refresh, now).await?;
        let (pair, _) = keys.issue_pair(user.id, &user.username, Self::lifetimes(config)?, now)?;
        Ok(pair)
    }

    /// Blacklists the caller's refresh token and ends the current session.
    pub async fn logout(
        pool: &SqlitePool,
        keys: &JwtKeys,
        refresh: &str,
        access_jti: Option<&str>,
        now: i64,
    ) -> AppResult<()> {
        let claims = Self::verify_refresh(pool, keys, refresh).await?;
        Self::blacklist(pool, &claims, refresh, now).await?;
        if let Some(jti) = access_jti {
            SessionService::deactivate(pool, jti).await?;
        }
        tracing::info!("User {} logged out", claims.username);
        Ok(())
    }

    pub async fn verify_refresh(pool: &SqlitePool, keys: &JwtKeys, token: &str) -> AppResult<Claims> {
        let claims = keys.verify(token, TokenType::Refresh)?;
        if Self::is_blacklisted(pool, &claims.jti).await? {
            return Err(AppError::unauthorized("Token is blacklisted", TOKEN_NOT_VALID));
        }
        Ok(claims)
    }

    pub async fn blacklist(pool: &SqlitePool, claims: &Claims, token: &str, now: i64) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO token_blacklist (jti, user_id, token_hash, expires_at, blacklisted_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(jti) DO NOTHING",
        )
        .bind(&claims.jti)
        .bind(claims.user_id().unwrap_or_default())
        .bind(fingerprint(token))
        .bind(claims.exp)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn is_blacklisted(pool: &SqlitePool, jti: &str) -> AppResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM token_blacklist WHERE jti = ?")
            .bind(jti)
            .fetch_one(pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    /// Blacklist rows for tokens that have expired anyway.
    pub async fn purge_blacklist(pool: &SqlitePool, now: i64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM token_blacklist WHERE expires_at < ?")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;
    use crate::core::models::RegisterInput;
    use chrono::Utc;

    async fn setup() -> (SqlitePool, JwtKeys, AppConfig) {
        let pool = test_pool().await;
        UserService::register(
            &pool,
            &RegisterInput {
                username: Some("ana".into()),
                email: Some("ana@mail.com".into()),
                password: Some("buenaclave1".into()),
            },
        )
        .await
        .unwrap();
        (pool, JwtKeys::new("test-secret"), AppConfig::default())
    }

    #[test]
    fn test_lifetimes_reject_overflow_and_zero() {
        let lifetimes = TokenService::lifetimes(&AppConfig::default()).unwrap();
        assert_eq!(lifetimes.access, Duration::minutes(15));

        let huge = AppConfig {
            access_token_minutes: i64::MAX / 2,
            ..AppConfig::default()
        };
        assert!(matches!(TokenService::lifetimes(&huge), Err(AppError::Unknown(_))));

        let zero = AppConfig {
            refresh_token_hours: 0,
            ..AppConfig::default()
        };
        assert!(TokenService::lifetimes(&zero).is_err());
    }

    fn login(username: &str, password: &str) -> LoginInput {
        LoginInput {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    #[tokio::test]
    async fn test_login_codes() {
        let (pool, keys, config) = setup().await;
        let now = Utc::now().timestamp();

        let pair = TokenService::login(&pool, &keys, &config, &login("ANA@mail.com", "buenaclave1"), now)
            .await
            .unwrap();
        assert!(keys.verify(&pair.access, TokenType::Access).is_ok());

        match TokenService::login(&pool, &keys, &config, &login("nadie", "x"), now).await {
            Err(AppError::Unauthorized { code, .. }) => assert_eq!(code, "user_not_found"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        match TokenService::login(&pool, &keys, &config, &login("ana", "mala"), now).await {
            Err(AppError::Unauthorized { code, .. }) => assert_eq!(code, "bad_password"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let (pool, keys, config) = setup().await;
        let now = Utc::now().timestamp();
        for _ in 0..config.login_max_attempts {
            assert!(TokenService::login(&pool, &keys, &config, &login("ana", "mala"), now)
                .await
                .is_err());
        }
        match TokenService::login(&pool, &keys, &config, &login("ana", "buenaclave1"), now).await {
            Err(AppError::TooManyRequests { code, .. }) => assert_eq!(code, "too_many_attempts"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        let later = now + config.login_window_minutes * 60 + 1;
        assert!(TokenService::login(&pool, &keys, &config, &login("ana", "buenaclave1"), later)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_blacklists() {
        let (pool, keys, config) = setup().await;
        let now = Utc::now().timestamp();
        let pair = TokenService::login(&pool, &keys, &config, &login("ana", "buenaclave1"), now)
            .await
            .unwrap();

        let rotated = TokenService::refresh(&pool, &keys, &config, Some(&pair.refresh), now)
            .await
            .unwrap();
        assert_ne!(rotated.refresh, pair.refresh);

        match TokenService::refresh(&pool, &keys, &config, Some(&pair.refresh), now).await {
            Err(AppError::Unauthorized { code, .. }) => assert_eq!(code, TOKEN_NOT_VALID),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(TokenService::refresh(&pool, &keys, &config, Some(&pair.access), now)
            .await
            .is_err());

        TokenService::logout(&pool, &keys, &rotated.refresh, None, now).await.unwrap();
        assert!(TokenService::logout(&pool, &keys, &rotated.refresh, None, now).await.is_err());
        assert_eq!(TokenService::purge_blacklist(&pool, now + 2 * 86400).await.unwrap(), 2);
    }
}
