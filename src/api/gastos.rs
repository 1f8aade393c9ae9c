use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::common::{created, JsonBody};
use crate::auth::AuthUser;
use crate::core::models::{Gasto, GastoInput};
use crate::core::search::{highlight, Highlight, TextSegment};
use crate::core::services::{GastoFilter, GastoService};
use crate::core::stats::{filter_gastos, gasto_page, gasto_stats, Estado, GastoStats, GroupBy};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GastoQuery {
    pub medio_pago: Option<i64>,
    pub grupo: Option<i64>,
    pub categoria: Option<String>,
    pub estado: Option<String>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub group_by: Option<String>,
}

impl GastoQuery {
    fn filter(&self) -> GastoFilter {
        GastoFilter {
            medio_pago: self.medio_pago,
            grupo: self.grupo,
            categoria: self.categoria.clone().filter(|c| !c.is_empty()),
        }
    }
}

/// The caller's own expenses, through the per-user cache.
pub(crate) async fn own_gastos(state: &AppState, user_id: i64) -> AppResult<Vec<Gasto>> {
    if let Some(gastos) = state.gastos_cache.get(&user_id) {
        return Ok(gastos);
    }
    let generation = state.gastos_cache.generation(&user_id);
    let gastos = GastoService::list(&state.db_pool, user_id, &GastoFilter::default()).await?;
    state.gastos_cache.insert_if_current(user_id, gastos.clone(), generation);
    Ok(gastos)
}

pub async fn list_gastos(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<GastoQuery>,
) -> AppResult<Response> {
    let filter = query.filter();
    let gastos = if filter.is_empty() {
        own_gastos(&state, user.id).await?
    } else {
        GastoService::list(&state.db_pool, user.id, &filter).await?
    };

    let estado = match query.estado.as_deref().filter(|e| !e.is_empty()) {
        None => Estado::Todos,
        Some(raw) => Estado::parse(raw)
            .ok_or_else(|| AppError::field("estado", format!("\"{}\" no es una elección válida.", raw)))?,
    };
    let gastos = filter_gastos(&gastos, query.search.as_deref().unwrap_or_default(), estado);

    let Some(page) = query.page else {
        return Ok(Json(gastos).into_response());
    };
    let group_by = match query.group_by.as_deref().filter(|g| !g.is_empty()) {
        None => None,
        Some(raw) => Some(
            GroupBy::parse(raw)
                .ok_or_else(|| AppError::field("group_by", format!("\"{}\" no es una elección válida.", raw)))?,
        ),
    };
    let per_page = match query.per_page {
        Some(n) => n,
        None => state.config.read().await.default_page_size,
    };
    Ok(Json(gasto_page(&gastos, group_by, page, per_page)).into_response())
}

pub async fn create_gasto(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    JsonBody(input): JsonBody<GastoInput>,
) -> AppResult<Response> {
    let gasto = GastoService::create(&state.db_pool, user.id, &input).await?;
    state.invalidate_gastos(user.id);
    Ok(created(gasto))
}

pub async fn get_gasto(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Gasto>> {
    Ok(Json(GastoService::get(&state.db_pool, user.id, id).await?))
}

pub async fn put_gasto(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(input): JsonBody<GastoInput>,
) -> AppResult<Json<Gasto>> {
    let gasto = GastoService::update(&state.db_pool, user.id, id, input, false).await?;
    state.invalidate_gastos(user.id);
    Ok(Json(gasto))
}

pub async fn patch_gasto(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
    JsonBody(input): JsonBody<GastoInput>,
) -> AppResult<Json<Gasto>> {
    let gasto = GastoService::update(&state.db_pool, user.id, id, input, true).await?;
    state.invalidate_gastos(user.id);
    Ok(Json(gasto))
}

pub async fn delete_gasto(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    GastoService::delete(&state.db_pool, user.id, id).await?;
    state.invalidate_gastos(user.id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PagoCuota {
    pub gasto: Gasto,
    pub message: String,
}

pub async fn pay_installment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<PagoCuota>> {
    let (gasto, message) = GastoService::pay_installment(&state.db_pool, user.id, id).await?;
    state.invalidate_gastos(user.id);
    tracing::info!("User {}: {}", user.username, message);
    Ok(Json(PagoCuota { gasto, message }))
}

pub async fn gasto_stats_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<GastoStats>> {
    let gastos = own_gastos(&state, user.id).await?;
    Ok(Json(gasto_stats(&gastos)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchHit {
    pub gasto: Gasto,
    pub highlight: Highlight,
}

/// Searchable text of an expense, in display order.
fn segments(gasto: &Gasto) -> Vec<TextSegment> {
    vec![
        TextSegment::new("td", gasto.vendedor.as_str()),
        TextSegment::new("td", gasto.categoria.as_str()),
        TextSegment::new("td", gasto.comentarios.as_str()),
    ]
}

pub async fn search_gastos(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<SearchHit>>> {
    let gastos = own_gastos(&state, user.id).await?;
    let hits = gastos
        .into_iter()
        .filter_map(|gasto| {
            let highlight = highlight(&segments(&gasto), &query.q);
            (highlight.total_matches > 0).then_some(SearchHit { gasto, highlight })
        })
        .collect();
    Ok(Json(hits))
}
