//! Bearer authentication and session tracking for `/api/` routes.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::core::models::TokenType;
use crate::core::services::{ClientInfo, SessionPolicy, SessionService, UserService};
use crate::error::AppError;
use crate::state::AppState;

use super::jwt::TOKEN_NOT_VALID;

/// Paths reachable without a token.
const PUBLIC_PATHS: &[&str] = &["/api/token/", "/api/token/refresh/", "/api/user/register/", "/healthz"];

const SWEEP_EVERY: u64 = 100;

/// The caller behind a verified access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub is_staff: bool,
    /// `jti` of the access token, which keys the session row
    pub jti: String,
}

impl AuthUser {
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "No tiene permiso para realizar esta acción.".to_string(),
            ))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(not_authenticated)
    }
}

fn not_authenticated() -> AppError {
    AppError::unauthorized(
        "Authentication credentials were not provided.",
        "not_authenticated",
    )
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// First `X-Forwarded-For` entry, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn is_guarded(path: &str) -> bool {
    path.starts_with("/api/") && !PUBLIC_PATHS.contains(&path)
}

pub async fn session_guard(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !is_guarded(req.uri().path()) {
        return next.run(req).await;
    }
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let headers = req.headers().clone();
    match authenticate(&state, &headers, peer).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

async fn authenticate(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
) -> Result<AuthUser, AppError> {
    let now = Utc::now().timestamp();
    let config = state.config.read().await.clone();

    let count = state.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
    if count % SWEEP_EVERY == 0 {
        let pool = state.db_pool.clone();
        let max_age = config.session_retention_hours.saturating_mul(3600);
        tokio::spawn(async move {
            match SessionService::delete_older_than(&pool, max_age, now).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Session sweep removed {} old rows", n),
                Err(e) => tracing::warn!("Session sweep failed: {}", e),
            }
        });
    }

    let token = bearer_token(headers).ok_or_else(not_authenticated)?;
    let claims = state.jwt.verify(token, TokenType::Access)?;
    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::unauthorized("Token is invalid", TOKEN_NOT_VALID))?;
    let user = UserService::get(&state.db_pool, user_id)
        .await
        .map_err(|_| AppError::unauthorized("User not found", "user_not_found"))?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let client = ClientInfo::new(client_ip(headers, peer), user_agent);
    let policy = SessionPolicy {
        timeout_minutes: config.session_timeout_minutes,
        max_sessions: config.max_sessions_per_user,
    };
    SessionService::track(&state.db_pool, &claims, user.id, &client, policy, now).await?;

    Ok(AuthUser {
        id: user.id,
        username: user.username,
        is_staff: user.is_staff,
        jti: claims.jti,
    })
}
