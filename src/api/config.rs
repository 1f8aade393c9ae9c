use axum::{
    extract::{Json, State},
};
use std::sync::Arc;

use super::common::JsonBody;
use crate::auth::AuthUser;
use crate::core::models::AppConfig;
use crate::error::AppResult;
use crate::state::AppState;

pub async fn load_config(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<AppConfig>> {
    user.require_staff()?;
    Ok(Json(state.config.read().await.clone()))
}

pub async fn save_config(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    JsonBody(config): JsonBody<AppConfig>,
) -> AppResult<Json<AppConfig>> {
    user.require_staff()?;
    config.validate()?;
    state.update_config(config.clone()).await?;
    tracing::info!("Configuration updated by {}", user.username);
    Ok(Json(config))
}
