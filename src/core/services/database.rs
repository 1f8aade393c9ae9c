//! Import of payment methods and expenses from the legacy Django database
//! (`api_mediopago`, `api_gasto`), PostgreSQL or SQLite.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::{ColumnIndex, Decode, Row, SqlitePool, Type};

use crate::core::dates::parse_local_date;
use crate::core::models::{CATEGORIAS, MONEDAS, TIPOS};
use crate::error::{AppError, AppResult};

const MEDIOS_QUERY: &str = "SELECT CAST(id AS BIGINT) AS id, ente_emisor, tipo, extra
    FROM api_mediopago ORDER BY id";

const GASTOS_QUERY: &str = "SELECT CAST(id AS BIGINT) AS id,
        CAST(monto AS DOUBLE PRECISION) AS monto,
        moneda,
        CAST(pagos_realizados AS BIGINT) AS pagos_realizados,
        CAST(pagos_totales AS BIGINT) AS pagos_totales,
        CAST(medio_pago_id AS BIGINT) AS medio_pago_id,
        vendedor, categoria, comentarios,
        CAST(fecha_gasto AS TEXT) AS fecha_gasto
    FROM api_gasto ORDER BY id";

/// Restricts both tables to one legacy owner.
fn scoped(query: &str, source_user: Option<i64>) -> String {
    match source_user {
        Some(id) => query.replace(" ORDER BY id", &format!(" WHERE user_id = {} ORDER BY id", id)),
        None => query.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct LegacyMedioPago {
    pub id: i64,
    pub ente_emisor: String,
    pub tipo: String,
    pub extra: String,
}

#[derive(Debug, Clone)]
pub struct LegacyGasto {
    pub id: i64,
    pub monto: f64,
    pub moneda: String,
    pub pagos_realizados: i64,
    pub pagos_totales: i64,
    pub medio_pago: i64,
    pub vendedor: String,
    pub categoria: String,
    pub comentarios: String,
    pub fecha_gasto: String,
}

#[derive(Debug, Default)]
pub struct LegacyData {
    pub medios_pago: Vec<LegacyMedioPago>,
    pub gastos: Vec<LegacyGasto>,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct ImportReport {
    pub medios_pago: usize,
    pub gastos: usize,
    pub skipped: usize,
}

fn medio_from_row<'r, R>(row: &'r R) -> Result<LegacyMedioPago, sqlx::Error>
where
    R: Row,
    &'r str: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    Ok(LegacyMedioPago {
        id: row.try_get("id")?,
        ente_emisor: row.try_get("ente_emisor")?,
        tipo: row.try_get("tipo")?,
        extra: row.try_get("extra")?,
    })
}

fn gasto_from_row<'r, R>(row: &'r R) -> Result<LegacyGasto, sqlx::Error>
where
    R: Row,
    &'r str: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    Ok(LegacyGasto {
        id: row.try_get("id")?,
        monto: row.try_get("monto")?,
        moneda: row.try_get("moneda")?,
        pagos_realizados: row.try_get("pagos_realizados")?,
        pagos_totales: row.try_get("pagos_totales")?,
        medio_pago: row.try_get("medio_pago_id")?,
        vendedor: row.try_get("vendedor")?,
        categoria: row.try_get("categoria")?,
        comentarios: row.try_get("comentarios")?,
        fecha_gasto: row.try_get("fecha_gasto")?,
    })
}

pub struct LegacyImporter;

impl LegacyImporter {
    pub async fn read_postgres(url: &str, source_user: Option<i64>) -> AppResult<LegacyData> {
        use sqlx::postgres::PgPoolOptions;

        let pool = PgPoolOptions::new().max_connections(1).connect(url).await?;
        let medios_pago = sqlx::query(&scoped(MEDIOS_QUERY, source_user))
            .fetch_all(&pool)
            .await?
            .iter()
            .map(medio_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let gastos = sqlx::query(&scoped(GASTOS_QUERY, source_user))
            .fetch_all(&pool)
            .await?
            .iter()
            .map(gasto_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        pool.close().await;
        Ok(LegacyData { medios_pago, gastos })
    }

    pub async fn read_sqlite(path: &str, source_user: Option<i64>) -> AppResult<LegacyData> {
        use sqlx::sqlite::SqlitePoolOptions;

        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{}", path)
        };
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await?;
        let medios_pago = sqlx::query(&scoped(MEDIOS_QUERY, source_user))
            .fetch_all(&pool)
            .await?
            .iter()
            .map(medio_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let gastos = sqlx::query(&scoped(GASTOS_QUERY, source_user))
            .fetch_all(&pool)
            .await?
            .iter()
            .map(gasto_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        pool.close().await;
        Ok(LegacyData { medios_pago, gastos })
    }

    pub async fn read_url(url: &str, source_user: Option<i64>) -> AppResult<LegacyData> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Self::read_postgres(url, source_user).await
        } else if url.starts_with("sqlite:") || url.ends_with(".db") || url.ends_with(".sqlite3") {
            Self::read_sqlite(url, source_user).await
        } else {
            Err(AppError::BadRequest(
                "Unsupported database URL, use postgres:// or sqlite:".to_string(),
            ))
        }
    }

    /// Writes the legacy rows under `user_id`, remapping ids. Rows that no
    /// longer fit the current model are skipped and counted.
    pub async fn import(pool: &SqlitePool, user_id: i64, data: &LegacyData) -> AppResult<ImportReport> {
        let mut report = ImportReport::default();
        let mut ids: HashMap<i64, i64> = HashMap::new();
        let mut tx = pool.begin().await?;

        for medio in &data.medios_pago {
            let tipo = medio.tipo.trim().to_uppercase();
            if !TIPOS.iter().any(|(k, _)| *k == tipo) {
                tracing::warn!("Skipping medio de pago {}: unknown tipo {:?}", medio.id, medio.tipo);
                report.skipped += 1;
                continue;
            }
            let tipo_tarjeta = matches!(tipo.as_str(), "TC" | "TD").then_some("OTROS");
            let new_id = sqlx::query(
                "INSERT INTO medios_pago (user_id, ente_emisor, tipo, tipo_tarjeta, extra) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(medio.ente_emisor.trim())
            .bind(&tipo)
            .bind(tipo_tarjeta)
            .bind(medio.extra.trim())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            ids.insert(medio.id, new_id);
            report.medios_pago += 1;
        }

        for gasto in &data.gastos {
            let (Some(medio_pago), Some(fecha)) =
                (ids.get(&gasto.medio_pago), parse_local_date(&gasto.fecha_gasto))
            else {
                tracing::warn!("Skipping gasto {}: missing medio de pago or bad date", gasto.id);
                report.skipped += 1;
                continue;
            };
            let moneda = if MONEDAS.iter().any(|(k, _)| *k == gasto.moneda) {
                gasto.moneda.as_str()
            } else {
                "NA"
            };
            let categoria = if CATEGORIAS.iter().any(|(k, _)| *k == gasto.categoria) {
                gasto.categoria.as_str()
            } else {
                "otros"
            };
            let pagos_totales = gasto.pagos_totales.max(1);
            sqlx::query(
                "INSERT INTO gastos (user_id, monto, moneda, pagos_realizados, pagos_totales, medio_pago_id,
                                     vendedor, categoria, comentarios, fecha_gasto, grupo_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, strftime('%s','now'))",
            )
            .bind(user_id)
            .bind(gasto.monto)
            .bind(moneda)
            .bind(gasto.pagos_realizados.clamp(0, pagos_totales))
            .bind(pagos_totales)
            .bind(medio_pago)
            .bind(&gasto.vendedor)
            .bind(categoria)
            .bind(&gasto.comentarios)
            .bind(fecha.format("%Y-%m-%d").to_string())
            .execute(&mut *tx)
            .await?;
            report.gastos += 1;
        }

        tx.commit().await?;
        tracing::info!(
            "Legacy import for user {}: {} medios de pago, {} gastos, {} skipped",
            user_id,
            report.medios_pago,
            report.gastos,
            report.skipped
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::test_pool;
    use crate::core::models::Gasto;
    use crate::core::services::medio_pago::tests::insert_user;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn legacy_db(dir: &std::path::Path) -> String {
        let url = format!("sqlite:{}?mode=rwc", dir.join("legacy.sqlite3").display());
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        for stmt in [
            "CREATE TABLE api_mediopago (id INTEGER PRIMARY KEY, user_id INTEGER, ente_emisor TEXT, tipo TEXT, extra TEXT)",
            "CREATE TABLE api_gasto (id INTEGER PRIMARY KEY, user_id INTEGER, monto REAL, moneda TEXT,
                pagos_realizados INTEGER, pagos_totales INTEGER, medio_pago_id INTEGER, vendedor TEXT,
                categoria TEXT, comentarios TEXT, fecha_gasto DATE)",
            "INSERT INTO api_mediopago VALUES (7, 1, 'Galicia', 'TC', ''), (8, 1, 'Cripto', 'BTC', ''), (9, 2, 'Santander', 'EF', '')",
            "INSERT INTO api_gasto VALUES
                (1, 1, 1500.5, 'ARS', 1, 3, 7, 'Coto', 'comida', '', '2024-05-02'),
                (2, 1, 20, 'EUR', 1, 1, 7, 'Amazon', 'juegos', '', '2024-06-10'),
                (3, 1, 99, 'ARS', 0, 1, 8, 'Binance', 'finanzas', '', '2024-06-11'),
                (4, 2, 10, 'ARS', 0, 1, 9, 'Kiosco', 'comida', '', '2024-06-12')",
        ] {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }
        pool.close().await;
        url
    }

    #[tokio::test]
    async fn test_import_remaps_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let url = legacy_db(dir.path()).await;
        let data = LegacyImporter::read_url(&url, Some(1)).await.unwrap();
        assert_eq!(data.medios_pago.len(), 2);
        assert_eq!(data.gastos.len(), 3);

        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let report = LegacyImporter::import(&pool, ana, &data).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                medios_pago: 1,
                gastos: 2,
                skipped: 2
            }
        );

        let gastos: Vec<Gasto> = sqlx::query("SELECT * FROM gastos ORDER BY fecha_gasto")
            .fetch_all(&pool)
            .await
            .unwrap()
            .iter()
            .map(|r| Gasto::from_row(r).unwrap())
            .collect();
        assert_eq!(gastos[0].vendedor, "Coto");
        assert_eq!(gastos[1].moneda, "NA");
        assert_eq!(gastos[1].categoria, "otros");
        assert_eq!(gastos[0].medio_pago, gastos[1].medio_pago);
    }

    #[tokio::test]
    async fn test_rejects_unknown_scheme() {
        assert!(matches!(
            LegacyImporter::read_url("mysql://localhost/gastos", None).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
