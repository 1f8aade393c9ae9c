use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::common::{created, ApiResponse, JsonBody};
use crate::auth::AuthUser;
use crate::core::models::{LoginInput, RefreshInput, RegisterInput, TokenPair, User};
use crate::core::services::{TokenService, UserService};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(input): JsonBody<RegisterInput>,
) -> AppResult<Response> {
    let user = UserService::register(&state.db_pool, &input).await?;
    Ok(created(user))
}

pub async fn obtain_token(
    State(state): State<Arc<AppState>>,
    JsonBody(input): JsonBody<LoginInput>,
) -> AppResult<Json<TokenPair>> {
    let config = state.config.read().await.clone();
    let pair = TokenService::login(
        &state.db_pool,
        &state.jwt,
        &config,
        &input,
        Utc::now().timestamp(),
    )
    .await?;
    Ok(Json(pair))
}

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    JsonBody(input): JsonBody<RefreshInput>,
) -> AppResult<Json<TokenPair>> {
    let config = state.config.read().await.clone();
    let pair = TokenService::refresh(
        &state.db_pool,
        &state.jwt,
        &config,
        input.refresh.as_deref(),
        Utc::now().timestamp(),
    )
    .await?;
    Ok(Json(pair))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<JsonBody<RefreshInput>>,
) -> Response {
    let refresh = body
        .and_then(|JsonBody(input)| input.refresh)
        .filter(|t| !t.trim().is_empty());
    let Some(refresh) = refresh else {
        return ApiResponse::err_with_status(StatusCode::BAD_REQUEST, "Refresh token required");
    };

    match TokenService::logout(
        &state.db_pool,
        &state.jwt,
        &refresh,
        Some(&user.jti),
        Utc::now().timestamp(),
    )
    .await
    {
        Ok(()) => Json(json!({ "success": true, "message": "Logout exitoso" })).into_response(),
        Err(e) => {
            let (status, message) = logout_error(&e);
            if status.is_server_error() {
                tracing::error!("Logout failed for {}: {}", user.username, e);
            } else {
                tracing::warn!("Logout failed for {}: {}", user.username, e);
            }
            ApiResponse::err_with_status(status, message)
        }
    }
}

/// Token problems are reported as-is. Storage failures stay in the log.
fn logout_error(e: &AppError) -> (StatusCode, String) {
    match e {
        AppError::Unauthorized { .. } | AppError::BadRequest(_) | AppError::Validation(_) => {
            (StatusCode::BAD_REQUEST, e.to_string())
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error interno del servidor.".to_string(),
        ),
    }
}

pub async fn me(State(state): State<Arc<AppState>>, user: AuthUser) -> AppResult<Json<User>> {
    Ok(Json(UserService::get(&state.db_pool, user.id).await?))
}
