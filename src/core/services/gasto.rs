use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{GrupoService, MedioPagoService};
use crate::core::models::{Gasto, GastoDraft, GastoInput};
use crate::error::{AppError, AppResult};

/// Server-side list filters. The client-side ones (search, estado) live in
/// `core::stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GastoFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medio_pago: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grupo: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categoria: Option<String>,
}

impl GastoFilter {
    pub fn is_empty(&self) -> bool {
        self.medio_pago.is_none() && self.grupo.is_none() && self.categoria.is_none()
    }
}

pub struct GastoService;

impl GastoService {
    /// Own expenses, or every expense of a grupo the caller belongs to when
    /// the filter names one.
    pub async fn list(pool: &SqlitePool, user_id: i64, filter: &GastoFilter) -> AppResult<Vec<Gasto>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM gastos WHERE ");
        match filter.grupo {
            Some(grupo_id) => {
                GrupoService::require_member(pool, grupo_id, user_id).await?;
                qb.push("grupo_id = ").push_bind(grupo_id);
            }
            None => {
                qb.push("user_id = ").push_bind(user_id);
            }
        }
        if let Some(medio_pago) = filter.medio_pago {
            qb.push(" AND medio_pago_id = ").push_bind(medio_pago);
        }
        if let Some(categoria) = filter.categoria.as_deref().filter(|c| !c.is_empty()) {
            qb.push(" AND categoria = ").push_bind(categoria.to_string());
        }
        qb.push(" ORDER BY fecha_gasto DESC, id DESC");

        let rows = qb.build().fetch_all(pool).await?;
        rows.iter().map(Gasto::from_row).collect()
    }

    /// Readable by its author and by active members of its grupo.
    pub async fn get(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<Gasto> {
        let gasto = Self::find(pool, id).await?.ok_or_else(|| AppError::not_found("Gasto"))?;
        if gasto.user == user_id {
            return Ok(gasto);
        }
        match gasto.grupo {
            Some(grupo_id) if GrupoService::require_member(pool, grupo_id, user_id).await.is_ok() => {
                Ok(gasto)
            }
            _ => Err(AppError::not_found("Gasto")),
        }
    }

    async fn find(pool: &SqlitePool, id: i64) -> AppResult<Option<Gasto>> {
        let row = sqlx::query("SELECT * FROM gastos WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(Gasto::from_row).transpose()
    }

    /// Writes are limited to the author.
    async fn get_owned(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<Gasto> {
        match Self::find(pool, id).await? {
            Some(gasto) if gasto.user == user_id => Ok(gasto),
            _ => Err(AppError::not_found("Gasto")),
        }
    }

    /// References must point at the caller's payment method and at a grupo
    /// where the caller may write.
    async fn check_references(pool: &SqlitePool, user_id: i64, draft: &GastoDraft) -> AppResult<()> {
        if MedioPagoService::get(pool, user_id, draft.medio_pago).await.is_err() {
            return Err(AppError::field("medio_pago", "Seleccione un medio de pago válido"));
        }
        if let Some(grupo_id) = draft.grupo {
            match GrupoService::require_member(pool, grupo_id, user_id).await {
                Ok(m) if m.role.can_write() => {}
                Ok(_) => {
                    return Err(AppError::field(
                        "grupo",
                        "No tiene permiso para agregar gastos a este grupo",
                    ))
                }
                Err(_) => return Err(AppError::field("grupo", "Grupo inválido")),
            }
        }
        Ok(())
    }

    pub async fn create(pool: &SqlitePool, user_id: i64, input: &GastoInput) -> AppResult<Gasto> {
        let draft = input.validate()?;
        Self::check_references(pool, user_id, &draft).await?;

        let id = sqlx::query(
            "INSERT INTO gastos (user_id, monto, moneda, pagos_realizados, pagos_totales, medio_pago_id,
                                 vendedor, categoria, comentarios, fecha_gasto, grupo_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%s','now'))",
        )
        .bind(user_id)
        .bind(draft.monto)
        .bind(&draft.moneda)
        .bind(draft.pagos_realizados)
        .bind(draft.pagos_totales)
        .bind(draft.medio_pago)
        .bind(&draft.vendedor)
        .bind(&draft.categoria)
        .bind(&draft.comentarios)
        .bind(draft.fecha_gasto.format("%Y-%m-%d").to_string())
        .bind(draft.grupo)
        .execute(pool)
        .await?
        .last_insert_rowid();
        tracing::debug!("User {} created gasto {}", user_id, id);
        Self::get_owned(pool, user_id, id).await
    }

    /// `partial` merges the stored record under the request and revalidates
    /// the merged result.
    pub async fn update(
        pool: &SqlitePool,
        user_id: i64,
        id: i64,
        input: GastoInput,
        partial: bool,
    ) -> AppResult<Gasto> {
        let existing = Self::get_owned(pool, user_id, id).await?;
        let input = if partial { input.overlay(&existing) } else { input };
        let draft = input.validate()?;
        Self::check_references(pool, user_id, &draft).await?;
        Self::write(pool, id, &draft).await?;
        Self::get_owned(pool, user_id, id).await
    }

    async fn write(pool: &SqlitePool, id: i64, draft: &GastoDraft) -> AppResult<()> {
        sqlx::query(
            "UPDATE gastos SET monto = ?, moneda = ?, pagos_realizados = ?, pagos_totales = ?,
                               medio_pago_id = ?, vendedor = ?, categoria = ?, comentarios = ?,
                               fecha_gasto = ?, grupo_id = ?
             WHERE id = ?",
        )
        .bind(draft.monto)
        .bind(&draft.moneda)
        .bind(draft.pagos_realizados)
        .bind(draft.pagos_totales)
        .bind(draft.medio_pago)
        .bind(&draft.vendedor)
        .bind(&draft.categoria)
        .bind(&draft.comentarios)
        .bind(draft.fecha_gasto.format("%Y-%m-%d").to_string())
        .bind(draft.grupo)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM gastos WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Gasto"));
        }
        Ok(())
    }

    /// Registers one more paid installment. Returns the updated expense and
    /// the confirmation message.
    pub async fn pay_installment(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<(Gasto, String)> {
        let gasto = Self::get_owned(pool, user_id, id).await?;
        if gasto.is_paid() {
            return Err(AppError::BadRequest(
                "Este gasto ya está completamente pagado.".to_string(),
            ));
        }
        sqlx::query(
            "UPDATE gastos SET pagos_realizados = pagos_realizados + 1
             WHERE id = ? AND pagos_realizados < pagos_totales",
        )
        .bind(id)
        .execute(pool)
        .await?;

        let gasto = Self::get_owned(pool, user_id, id).await?;
        let message = format!(
            "Cuota {} de {} pagada exitosamente.",
            gasto.pagos_realizados, gasto.pagos_totales
        );
        Ok((gasto, message))
    }
}
