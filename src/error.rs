use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Field name -> messages, rendered as the body of a 400 response.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("{detail}")]
    Unauthorized { detail: String, code: &'static str },

    #[error("Session expired due to inactivity")]
    SessionTimeout { timeout_minutes: i64 },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{detail}")]
    TooManyRequests { detail: String, code: &'static str },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{0}")]
    Unknown(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        Self::BadRequest(format!("JSON inválido: {}", rejection.body_text()))
    }
}

impl AppError {
    pub fn unauthorized(detail: impl Into<String>, code: &'static str) -> Self {
        Self::Unauthorized {
            detail: detail.into(),
            code,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} no encontrado.", what))
    }

    /// Single-field validation error.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized { .. } | AppError::SessionTimeout { .. } => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(errors) => json!(errors),
            AppError::Unauthorized { detail, code } | AppError::TooManyRequests { detail, code } => {
                json!({ "detail": detail, "code": code })
            }
            AppError::SessionTimeout { timeout_minutes } => json!({
                "success": false,
                "error": self.to_string(),
                "code": "SESSION_TIMEOUT",
                "timeout_minutes": timeout_minutes,
            }),
            AppError::Forbidden(detail) | AppError::NotFound(detail) | AppError::BadRequest(detail) => {
                json!({ "detail": detail })
            }
            AppError::Network(e) => {
                tracing::warn!("upstream request failed: {}", e);
                json!({ "success": false, "error": e.to_string() })
            }
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                json!({ "detail": "Error interno del servidor." })
            }
            AppError::Unknown(e) => {
                tracing::error!("internal error: {}", e);
                json!({ "detail": "Error interno del servidor." })
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::field("monto", "x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::unauthorized("no", "bad_password").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::SessionTimeout { timeout_minutes: 60 }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::not_found("Gasto").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Unknown("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(AppError::not_found("Gasto").to_string(), "Gasto no encontrado.");
    }
}
