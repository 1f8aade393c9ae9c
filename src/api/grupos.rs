//! Grupos, their memberships and invitations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{Local, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::common::{created, JsonBody};
use crate::auth::AuthUser;
use crate::core::models::{
    AcceptInvitation, GrupoInput, GrupoInvitation, GrupoMembership, GrupoView, InvitationInput,
    MembershipUpdate,
};
use crate::core::services::{GrupoService, InvitationService, MembershipService};
use crate::core::stats::GrupoStats;
use crate::core::validation::REQUIRED;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub async fn list_grupos(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<GrupoView>>> {
    Ok(Json(GrupoService::list(&state.db_pool, user.id).await?))
}

pub async fn create_grupo(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    JsonBody(input): JsonBody<GrupoInput>,
) -> AppResult<Response> {
    let grupo = GrupoService::create(&state.db_pool, user.id, &input).await?;
    Ok(created(grupo))
}

pub async fn get_grupo(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<GrupoView>> {
    Ok(Json(GrupoService::get(&state.db_pool, user.id, id).await?))
}

pub async fn put_grupo(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(input): JsonBody<GrupoInput>,
) -> AppResult<Json<GrupoView>> {
    Ok(Json(
        GrupoService::update(&state.db_pool, user.id, id, input, false).await?,
    ))
}

pub async fn patch_grupo(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(input): JsonBody<GrupoInput>,
) -> AppResult<Json<GrupoView>> {
    Ok(Json(
        GrupoService::update(&state.db_pool, user.id, id, input, true).await?,
    ))
}

pub async fn delete_grupo(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    GrupoService::delete(&state.db_pool, user.id, id).await?;
    // expenses of every member lost their grupo reference
    state.gastos_cache.clear();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn grupo_stats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<GrupoStats>> {
    let today = Local::now().date_naive();
    Ok(Json(
        GrupoService::stats(&state.db_pool, user.id, id, today).await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct MembershipQuery {
    pub grupo_id: Option<i64>,
}

pub async fn list_memberships(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<MembershipQuery>,
) -> AppResult<Json<Vec<GrupoMembership>>> {
    let grupo_id = query
        .grupo_id
        .ok_or_else(|| AppError::field("grupo_id", REQUIRED))?;
    Ok(Json(
        MembershipService::list(&state.db_pool, user.id, grupo_id).await?,
    ))
}

pub async fn update_membership(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(update): JsonBody<MembershipUpdate>,
) -> AppResult<Json<GrupoMembership>> {
    Ok(Json(
        MembershipService::update(&state.db_pool, user.id, id, &update).await?,
    ))
}

pub async fn delete_membership(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    MembershipService::delete(&state.db_pool, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct InvitationQuery {
    pub grupo_id: Option<i64>,
    /// `true`/`false`, as sent by the front end
    pub pending: Option<String>,
}

pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    JsonBody(input): JsonBody<InvitationInput>,
) -> AppResult<Response> {
    let invitation = InvitationService::create(&state.db_pool, user.id, &input, Utc::now()).await?;
    Ok(created(invitation))
}

pub async fn list_invitations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<InvitationQuery>,
) -> AppResult<Json<Vec<GrupoInvitation>>> {
    let pending = matches!(query.pending.as_deref(), Some("true" | "1" | "True"));
    Ok(Json(
        InvitationService::list(&state.db_pool, user.id, query.grupo_id, pending, Utc::now()).await?,
    ))
}

pub async fn delete_invitation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    InvitationService::delete(&state.db_pool, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    JsonBody(input): JsonBody<AcceptInvitation>,
) -> AppResult<Json<GrupoMembership>> {
    Ok(Json(
        InvitationService::accept(&state.db_pool, user.id, &input.token, Utc::now()).await?,
    ))
}
