use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use std::sync::Arc;

use super::common::{created, JsonBody};
use crate::auth::AuthUser;
use crate::core::models::{MedioPago, MedioPagoInput};
use crate::core::services::MedioPagoService;
use crate::error::AppResult;
use crate::state::AppState;

pub async fn list_medios_pago(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<MedioPago>>> {
    Ok(Json(MedioPagoService::list(&state.db_pool, user.id).await?))
}

pub async fn create_medio_pago(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    JsonBody(input): JsonBody<MedioPagoInput>,
) -> AppResult<Response> {
    let medio = MedioPagoService::create(&state.db_pool, user.id, &input).await?;
    Ok(created(medio))
}

pub async fn get_medio_pago(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<MedioPago>> {
    Ok(Json(MedioPagoService::get(&state.db_pool, user.id, id).await?))
}

pub async fn put_medio_pago(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(input): JsonBody<MedioPagoInput>,
) -> AppResult<Json<MedioPago>> {
    Ok(Json(
        MedioPagoService::update(&state.db_pool, user.id, id, input, false).await?,
    ))
}

pub async fn patch_medio_pago(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(input): JsonBody<MedioPagoInput>,
) -> AppResult<Json<MedioPago>> {
    Ok(Json(
        MedioPagoService::update(&state.db_pool, user.id, id, input, true).await?,
    ))
}

pub async fn delete_medio_pago(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    MedioPagoService::delete(&state.db_pool, user.id, id).await?;
    // cascaded expenses
    state.invalidate_gastos(user.id);
    Ok(StatusCode::NO_CONTENT)
}
