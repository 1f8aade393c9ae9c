use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}};
use serde_json::Value;
use std::sync::Arc;

use super::common::ApiResponse;
use crate::state::AppState;

/// Relays the exchange-rate upstream.
pub async fn get_cotizacion(State(state): State<Arc<AppState>>) -> Response {
    let url = state.config.read().await.cotizacion_url.clone();

    let response = match state.http.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Cotizacion upstream unreachable: {}", e);
            return ApiResponse::err_with_status(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
        }
    };
    if response.status() != reqwest::StatusCode::OK {
        tracing::warn!("Cotizacion upstream answered {}", response.status());
        return ApiResponse::err_with_status(StatusCode::BAD_GATEWAY, "Bad Gateway");
    }
    match response.json::<Value>().await {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => {
            tracing::warn!("Cotizacion upstream sent invalid JSON: {}", e);
            ApiResponse::err_with_status(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}
