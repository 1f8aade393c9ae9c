use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

use crate::api::{build_routes, common};
use crate::core::traits::StorageConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub struct WebServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    static_dir: Option<PathBuf>,
}

impl WebServer {
    pub fn new(state: Arc<AppState>, addr: SocketAddr, static_dir: Option<PathBuf>) -> Self {
        Self {
            addr,
            state,
            static_dir,
        }
    }

    /// Empty origin list means any origin.
    fn cors(origins: &[String]) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers(Any);
        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin {:?}", o);
                    None
                }
            })
            .collect();
        if allowed.is_empty() {
            layer.allow_origin(Any)
        } else {
            layer.allow_origin(AllowOrigin::list(allowed))
        }
    }

    /// API routes first, then the front-end bundle with `index.html` for
    /// every unmatched path.
    pub async fn router(&self) -> Router {
        let origins = self.state.config.read().await.cors_origins.clone();
        let app = build_routes(self.state.clone());

        let app = match &self.static_dir {
            Some(static_dir) => {
                let index_path = static_dir.join("index.html");
                if static_dir.exists() && index_path.exists() {
                    tracing::info!("Serving static files from {:?}", static_dir);
                    app.fallback_service(
                        ServeDir::new(static_dir)
                            .append_index_html_on_directories(true)
                            .fallback(ServeFile::new(index_path)),
                    )
                } else {
                    tracing::warn!("Static directory {:?} or index.html not found", static_dir);
                    app
                }
            }
            None => app,
        };

        app.layer(Self::cors(&origins))
            .layer(axum::middleware::from_fn(common::request_logger))
    }

    pub async fn run(self) -> AppResult<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| AppError::Unknown(format!("Failed to bind {}: {}", self.addr, e)))?;
        tracing::info!("Server listening on {}", self.addr);
        tracing::info!("Data directory: {:?}", self.state.storage.data_dir());
        self.serve(listener).await
    }

    /// Serves on an already bound listener. Peer addresses reach the
    /// session guard through `ConnectInfo`.
    pub async fn serve(self, listener: TcpListener) -> AppResult<()> {
        let app = self.router().await;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| AppError::Unknown(format!("Server error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_spa_fallback_and_cors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>gastos</html>").unwrap();

        let state = AppState::for_tests().await;
        let server = WebServer::new(
            state,
            "127.0.0.1:0".parse().unwrap(),
            Some(dir.path().to_path_buf()),
        );
        let app = server.router().await;

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/dashboard/gastos")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
    }

    #[test]
    fn test_cors_ignores_invalid_origins() {
        // builds without panicking on a bad header value
        let _ = WebServer::cors(&["http://ok.example".to_string(), "bad\norigin".to_string()]);
    }
}
