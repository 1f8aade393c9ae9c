//! Runtime configuration persisted in the `configs` table.

use serde::{Deserialize, Serialize};

use crate::core::validation::Validator;
use crate::error::AppResult;

/// Tunables editable at runtime through `/api/config/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Access token lifetime
    pub access_token_minutes: i64,

    /// Refresh token lifetime
    pub refresh_token_hours: i64,

    /// A session idle longer than this is rejected with `SESSION_TIMEOUT`
    pub session_timeout_minutes: i64,

    pub max_sessions_per_user: usize,

    /// Failed logins allowed per identifier inside `login_window_minutes`
    pub login_max_attempts: i64,
    pub login_window_minutes: i64,
    pub login_retention_days: i64,

    /// Session rows older than this are swept
    pub session_retention_hours: i64,

    pub gastos_cache_seconds: u64,

    pub cotizacion_url: String,

    /// Allowed CORS origins. Empty means permissive.
    pub cors_origins: Vec<String>,

    pub default_page_size: usize,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            access_token_minutes: 15,
            refresh_token_hours: 24,
            session_timeout_minutes: 60,
            max_sessions_per_user: 3,
            login_max_attempts: 5,
            login_window_minutes: 15,
            login_retention_days: 30,
            session_retention_hours: 24,
            gastos_cache_seconds: 300,
            cotizacion_url: "https://dolarapi.com/v1/dolares".to_string(),
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            default_page_size: 10,
        }
    }
}

fn bounded<T>(v: &mut Validator, field: &str, value: T, min: T, max: T)
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        v.error(
            field,
            format!("Debe estar entre {} y {}.", min, max),
        );
    }
}

impl AppConfig {
    /// Every duration is later multiplied into seconds and handed to chrono,
    /// so each field is kept to a small positive range.
    pub fn validate(&self) -> AppResult<()> {
        let mut v = Validator::new();
        bounded(&mut v, "access_token_minutes", self.access_token_minutes, 1, 1440);
        bounded(&mut v, "refresh_token_hours", self.refresh_token_hours, 1, 2160);
        bounded(&mut v, "session_timeout_minutes", self.session_timeout_minutes, 1, 10080);
        bounded(&mut v, "max_sessions_per_user", self.max_sessions_per_user, 1, 100);
        bounded(&mut v, "login_max_attempts", self.login_max_attempts, 1, 1000);
        bounded(&mut v, "login_window_minutes", self.login_window_minutes, 1, 1440);
        bounded(&mut v, "login_retention_days", self.login_retention_days, 1, 3650);
        bounded(&mut v, "session_retention_hours", self.session_retention_hours, 1, 8760);
        bounded(&mut v, "gastos_cache_seconds", self.gastos_cache_seconds, 0, 86400);
        bounded(&mut v, "default_page_size", self.default_page_size, 1, 500);
        match url::Url::parse(&self.cotizacion_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => v.error("cotizacion_url", "Introduzca una URL válida."),
        }
        v.finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
