//! Typed REST client for a running gastos server.
//!
//! Mirrors what the browser front end does around each call: requests are
//! only sent with an access token that is not about to expire, an expired
//! one is refreshed first, and a `401` gets one refresh and one retry before
//! the stored tokens are dropped.

mod cached;
mod gate;
mod store;

pub use cached::CachedGastos;
pub use gate::{auth_gate, is_token_expired, AuthGate, DEFAULT_EXPIRY_BUFFER_SECS};
pub use store::{FileTokenStore, MemoryTokenStore, StoredTokens, TokenStore};

use std::sync::Arc;

use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::api::PagoCuota;
use crate::core::models::{
    AcceptInvitation, Gasto, GastoInput, GrupoInput, GrupoInvitation, GrupoMembership, GrupoView,
    InvitationInput, LoginInput, MedioPago, MedioPagoInput, RefreshInput, RegisterInput, TokenPair,
    User,
};
use crate::core::services::GastoFilter;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("refresh token expired")]
    SessionExpired,

    #[error("server answered {status}: {body}")]
    Api { status: u16, body: Value },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("token store error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub struct GastosClient {
    http: reqwest::Client,
    base: Url,
    store: Arc<dyn TokenStore>,
}

impl GastosClient {
    pub fn new(base_url: &str, store: Arc<dyn TokenStore>) -> Result<Self, ClientError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(base_url)?,
            store,
        })
    }

    pub fn tokens(&self) -> Result<StoredTokens, ClientError> {
        self.store.load()
    }

    /// Route-guard decision for the stored tokens, clearing what it rejects.
    pub fn auth_state(&self) -> Result<AuthGate, ClientError> {
        let mut tokens = self.store.load()?;
        let gate = auth_gate(
            tokens.access.as_deref(),
            tokens.refresh.as_deref(),
            Utc::now().timestamp(),
        );
        match gate {
            AuthGate::Unauthenticated => self.store.clear()?,
            AuthGate::NeedsRefresh { clear_access: true } => {
                tokens.access = None;
                self.store.save(&tokens)?;
            }
            _ => {}
        }
        Ok(gate)
    }

    async fn raw(
        &self,
        method: Method,
        path: &str,
        query: Option<&Value>,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ClientError> {
        let mut req = self.http.request(method, self.base.join(path)?);
        if let Some(query) = query {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let text = res.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Err(ClientError::Api { status, body })
    }

    /// Rotates the pair through `/api/token/refresh/` and returns the new
    /// access token.
    async fn refresh(&self) -> Result<String, ClientError> {
        let tokens = self.store.load()?;
        let refresh = tokens.refresh.ok_or(ClientError::NotAuthenticated)?;
        if is_token_expired(&refresh, Utc::now().timestamp(), DEFAULT_EXPIRY_BUFFER_SECS) {
            return Err(ClientError::SessionExpired);
        }
        let body = serde_json::to_value(RefreshInput {
            refresh: Some(refresh),
        })?;
        let res = self
            .raw(Method::POST, "/api/token/refresh/", None, Some(&body), None)
            .await?;
        let pair: TokenPair = Self::check(res).await?.json().await?;
        self.store.save(&StoredTokens {
            access: Some(pair.access.clone()),
            refresh: Some(pair.refresh),
        })?;
        tracing::debug!("Access token refreshed");
        Ok(pair.access)
    }

    /// Access token good for at least the expiry buffer.
    async fn access_token(&self) -> Result<String, ClientError> {
        let tokens = self.store.load()?;
        let Some(access) = tokens.access else {
            self.store.clear()?;
            return Err(ClientError::NotAuthenticated);
        };
        if !is_token_expired(&access, Utc::now().timestamp(), DEFAULT_EXPIRY_BUFFER_SECS) {
            return Ok(access);
        }
        match self.refresh().await {
            Ok(access) => Ok(access),
            Err(e) => {
                self.store.clear()?;
                Err(e)
            }
        }
    }

    async fn authorized(
        &self,
        method: Method,
        path: &str,
        query: Option<&Value>,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let token = self.access_token().await?;
        let res = self
            .raw(method.clone(), path, query, body, Some(&token))
            .await?;
        if res.status() != StatusCode::UNAUTHORIZED {
            return Self::check(res).await;
        }

        let token = match self.refresh().await {
            Ok(token) => token,
            Err(e) => {
                self.store.clear()?;
                return Err(e);
            }
        };
        let res = self.raw(method, path, query, body, Some(&token)).await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            self.store.clear()?;
        }
        Self::check(res).await
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ClientError> {
        let body = body.map(serde_json::to_value).transpose()?;
        let res = self.authorized(method, path, None, body.as_ref()).await?;
        Ok(res.json().await?)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ClientError> {
        let body = serde_json::to_value(LoginInput {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        })?;
        let res = self
            .raw(Method::POST, "/api/token/", None, Some(&body), None)
            .await?;
        let pair: TokenPair = Self::check(res).await?.json().await?;
        self.store.save(&StoredTokens {
            access: Some(pair.access.clone()),
            refresh: Some(pair.refresh.clone()),
        })?;
        Ok(pair)
    }

    pub async fn register(&self, input: &RegisterInput) -> Result<User, ClientError> {
        let body = serde_json::to_value(input)?;
        let res = self
            .raw(Method::POST, "/api/user/register/", None, Some(&body), None)
            .await?;
        Ok(Self::check(res).await?.json().await?)
    }

    /// Local tokens are dropped whatever the server answers.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let refresh = self.store.load()?.refresh;
        let result = match refresh {
            Some(refresh) => self
                .authorized(
                    Method::POST,
                    "/api/logout/",
                    None,
                    Some(&json!({ "refresh": refresh })),
                )
                .await
                .map(|_| ()),
            None => Err(ClientError::NotAuthenticated),
        };
        self.store.clear()?;
        result
    }

    pub async fn me(&self) -> Result<User, ClientError> {
        self.call::<(), _>(Method::GET, "/api/user/", None).await
    }

    pub async fn list_gastos(&self, filter: &GastoFilter) -> Result<Vec<Gasto>, ClientError> {
        let query = serde_json::to_value(filter)?;
        let res = self
            .authorized(Method::GET, "/api/gastos/", Some(&query), None)
            .await?;
        Ok(res.json().await?)
    }

    pub async fn create_gasto(&self, input: &GastoInput) -> Result<Gasto, ClientError> {
        self.call(Method::POST, "/api/gastos/", Some(input)).await
    }

    pub async fn pay_installment(&self, id: i64) -> Result<PagoCuota, ClientError> {
        self.call::<(), _>(Method::POST, &format!("/api/gastos/{}/pagar-cuota/", id), None)
            .await
    }

    pub async fn delete_gasto(&self, id: i64) -> Result<(), ClientError> {
        self.authorized(Method::DELETE, &format!("/api/gastos/{}/", id), None, None)
            .await?;
        Ok(())
    }

    pub async fn list_medios_pago(&self) -> Result<Vec<MedioPago>, ClientError> {
        self.call::<(), _>(Method::GET, "/api/medios-pago/", None).await
    }

    pub async fn create_medio_pago(&self, input: &MedioPagoInput) -> Result<MedioPago, ClientError> {
        self.call(Method::POST, "/api/medios-pago/", Some(input)).await
    }

    pub async fn list_grupos(&self) -> Result<Vec<GrupoView>, ClientError> {
        self.call::<(), _>(Method::GET, "/api/grupos/", None).await
    }

    pub async fn create_grupo(&self, input: &GrupoInput) -> Result<GrupoView, ClientError> {
        self.call(Method::POST, "/api/grupos/", Some(input)).await
    }

    pub async fn invite(&self, input: &InvitationInput) -> Result<GrupoInvitation, ClientError> {
        self.call(Method::POST, "/api/grupo-invitations/", Some(input))
            .await
    }

    pub async fn accept_invitation(&self, token: &str) -> Result<GrupoMembership, ClientError> {
        let body = AcceptInvitation {
            token: token.to_string(),
        };
        self.call(Method::POST, "/api/grupo-invitations/accept/", Some(&body))
            .await
    }
}
