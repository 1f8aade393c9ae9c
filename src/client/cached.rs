use std::sync::Arc;
use std::time::Duration;

use super::{ClientError, GastosClient};
use crate::core::cache::TtlCache;
use crate::core::models::Gasto;
use crate::core::services::GastoFilter;
use crate::core::stats::{gasto_stats, GastoStats};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// The caller's expense list, fetched once and reused while fresh.
pub struct CachedGastos {
    client: Arc<GastosClient>,
    cache: TtlCache<(), Vec<Gasto>>,
}

impl CachedGastos {
    pub fn new(client: Arc<GastosClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new(ttl),
        }
    }

    pub fn with_default_ttl(client: Arc<GastosClient>) -> Self {
        Self::new(client, DEFAULT_TTL)
    }

    /// A failed fetch falls back to whatever was cached before, however old.
    pub async fn fetch(&self, force: bool) -> Result<Vec<Gasto>, ClientError> {
        if !force {
            if let Some(gastos) = self.cache.get(&()) {
                return Ok(gastos);
            }
        }
        match self.client.list_gastos(&GastoFilter::default()).await {
            Ok(gastos) => {
                self.cache.insert((), gastos.clone());
                Ok(gastos)
            }
            Err(e) => match self.cache.get_stale(&()) {
                Some(stale) => {
                    tracing::warn!("Serving cached gastos after fetch error: {}", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    pub fn invalidate(&self) {
        self.cache.clear();
    }

    fn cached(&self) -> Vec<Gasto> {
        self.cache.get_stale(&()).unwrap_or_default()
    }

    pub fn stats(&self) -> GastoStats {
        gasto_stats(&self.cached())
    }

    pub fn by_medio_pago(&self, medio_pago: i64) -> Vec<Gasto> {
        self.cached()
            .into_iter()
            .filter(|g| g.medio_pago == medio_pago)
            .collect()
    }

    pub fn by_grupo(&self, grupo: i64) -> Vec<Gasto> {
        self.cached()
            .into_iter()
            .filter(|g| g.grupo == Some(grupo))
            .collect()
    }

    pub fn by_id(&self, id: i64) -> Option<Gasto> {
        self.cached().into_iter().find(|g| g.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{signed_in, spawn_server};
    use crate::core::models::{GastoInput, MedioPagoInput};
    use serde_json::json;

    #[tokio::test]
    async fn test_fetch_serves_cache_until_forced() {
        let base = spawn_server().await;
        let client = Arc::new(signed_in(&base, "ana").await);
        let medio = client
            .create_medio_pago(&MedioPagoInput {
                ente_emisor: Some("Efectivo".into()),
                tipo: Some("EF".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let input = GastoInput {
            monto: Some(json!(100)),
            moneda: Some("USD".into()),
            pagos_realizados: Some(json!(1)),
            pagos_totales: Some(json!(1)),
            medio_pago: Some(json!(medio.id)),
            vendedor: Some("Kiosco".into()),
            fecha_gasto: Some("2026-10-10".into()),
            ..Default::default()
        };
        let first = client.create_gasto(&input).await.unwrap();

        let cached = CachedGastos::with_default_ttl(client.clone());
        assert_eq!(cached.fetch(false).await.unwrap().len(), 1);

        client.create_gasto(&input).await.unwrap();
        assert_eq!(cached.fetch(false).await.unwrap().len(), 1);
        assert_eq!(cached.fetch(true).await.unwrap().len(), 2);

        assert_eq!(cached.by_medio_pago(medio.id).len(), 2);
        assert!(cached.by_grupo(1).is_empty());
        assert_eq!(cached.by_id(first.id).unwrap().vendedor, "Kiosco");
        assert_eq!(cached.stats().by_currency["USD"].total_amount, 200.0);

        // stale data survives a failed refresh
        client.logout().await.unwrap();
        assert_eq!(cached.fetch(true).await.unwrap().len(), 2);

        cached.invalidate();
        assert!(cached.fetch(false).await.is_err());
    }
}
