use crate::auth::session_guard;
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

mod auth;
pub mod common;
mod config;
mod cotizacion;
mod gastos;
mod grupos;
mod medios_pago;

pub use gastos::{PagoCuota, SearchHit};

/// Every `/api/` route except login, refresh and register goes through the
/// session guard.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Auth
        .route("/api/user/register/", post(auth::register))
        .route("/api/token/", post(auth::obtain_token))
        .route("/api/token/refresh/", post(auth::refresh_token))
        .route("/api/logout/", post(auth::logout))
        .route("/api/user/", get(auth::me))
        // Medios de pago
        .route(
            "/api/medios-pago/",
            get(medios_pago::list_medios_pago).post(medios_pago::create_medio_pago),
        )
        .route(
            "/api/medios-pago/:id/",
            get(medios_pago::get_medio_pago)
                .put(medios_pago::put_medio_pago)
                .patch(medios_pago::patch_medio_pago)
                .delete(medios_pago::delete_medio_pago),
        )
        // Gastos
        .route(
            "/api/gastos/",
            get(gastos::list_gastos).post(gastos::create_gasto),
        )
        .route("/api/gastos/stats/", get(gastos::gasto_stats_handler))
        .route("/api/gastos/search/", get(gastos::search_gastos))
        .route(
            "/api/gastos/:id/",
            get(gastos::get_gasto)
                .put(gastos::put_gasto)
                .patch(gastos::patch_gasto)
                .delete(gastos::delete_gasto),
        )
        .route("/api/gastos/:id/pagar-cuota/", post(gastos::pay_installment))
        // Grupos
        .route(
            "/api/grupos/",
            get(grupos::list_grupos).post(grupos::create_grupo),
        )
        .route(
            "/api/grupos/:id/",
            get(grupos::get_grupo)
                .put(grupos::put_grupo)
                .patch(grupos::patch_grupo)
                .delete(grupos::delete_grupo),
        )
        .route("/api/grupos/:id/stats/", get(grupos::grupo_stats))
        .route("/api/grupo-memberships/", get(grupos::list_memberships))
        .route(
            "/api/grupo-memberships/:id/",
            axum::routing::patch(grupos::update_membership).delete(grupos::delete_membership),
        )
        .route(
            "/api/grupo-invitations/",
            get(grupos::list_invitations).post(grupos::create_invitation),
        )
        .route(
            "/api/grupo-invitations/accept/",
            post(grupos::accept_invitation),
        )
        .route(
            "/api/grupo-invitations/:id/",
            axum::routing::delete(grupos::delete_invitation),
        )
        // Exchange rates
        .route("/api/cotizacion/", get(cotizacion::get_cotizacion))
        // Config
        .route(
            "/api/config/",
            get(config::load_config).put(config::save_config),
        )
        // Health
        .route("/healthz", get(|| async { "ok" }))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            session_guard,
        ))
        .with_state(state)
}
