//! Shared expense groups. Visibility follows active membership: a grupo the
//! caller does not belong to reads as missing.

use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::core::models::{Gasto, Grupo, GrupoDraft, GrupoInput, GrupoMembership, GrupoView, Role};
use crate::core::stats::{grupo_stats, GrupoStats};
use crate::error::{AppError, AppResult};

const VIEW_SELECT: &str = "SELECT g.*,
        (SELECT COUNT(*) FROM grupo_memberships m WHERE m.grupo_id = g.id AND m.is_active = TRUE) AS member_count,
        (SELECT TOTAL(x.monto) FROM gastos x WHERE x.grupo_id = g.id) AS total_expenses,
        me.role AS my_role
    FROM grupos g
    JOIN grupo_memberships me ON me.grupo_id = g.id AND me.user_id = ? AND me.is_active = TRUE";

pub(crate) const MEMBERSHIP_SELECT: &str = "SELECT m.id, m.grupo_id, m.user_id, u.username, m.role, m.is_active, m.joined_at
    FROM grupo_memberships m JOIN users u ON u.id = m.user_id";

fn view_from_row(row: &SqliteRow) -> AppResult<GrupoView> {
    let role: String = row.try_get("my_role")?;
    Ok(GrupoView {
        grupo: Grupo::from_row(row)?,
        member_count: row.try_get("member_count")?,
        total_expenses: row.try_get("total_expenses")?,
        my_role: Role::parse(&role),
    })
}

pub struct GrupoService;

impl GrupoService {
    pub async fn list(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<GrupoView>> {
        let rows = sqlx::query(&format!("{} ORDER BY g.created_at DESC, g.id DESC", VIEW_SELECT))
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        rows.iter().map(view_from_row).collect()
    }

    pub async fn get(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<GrupoView> {
        let row = sqlx::query(&format!("{} WHERE g.id = ?", VIEW_SELECT))
            .bind(user_id)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Grupo"))?;
        view_from_row(&row)
    }

    /// The raw record, without membership filtering.
    pub async fn find(pool: &SqlitePool, id: i64) -> AppResult<Option<Grupo>> {
        let row = sqlx::query("SELECT * FROM grupos WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(Grupo::from_row).transpose()
    }

    /// Any membership row, active or not.
    pub async fn membership(
        pool: &SqlitePool,
        grupo_id: i64,
        user_id: i64,
    ) -> AppResult<Option<GrupoMembership>> {
        let row = sqlx::query(&format!(
            "{} WHERE m.grupo_id = ? AND m.user_id = ?",
            MEMBERSHIP_SELECT
        ))
        .bind(grupo_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        row.as_ref().map(GrupoMembership::from_row).transpose()
    }

    /// Active membership, or 404 for the grupo.
    pub async fn require_member(
        pool: &SqlitePool,
        grupo_id: i64,
        user_id: i64,
    ) -> AppResult<GrupoMembership> {
        match Self::membership(pool, grupo_id, user_id).await? {
            Some(m) if m.is_active => Ok(m),
            _ => Err(AppError::not_found("Grupo")),
        }
    }

    /// Active owner/admin membership.
    pub async fn require_manager(
        pool: &SqlitePool,
        grupo_id: i64,
        user_id: i64,
    ) -> AppResult<GrupoMembership> {
        let membership = Self::require_member(pool, grupo_id, user_id).await?;
        if !membership.role.can_manage() {
            return Err(AppError::Forbidden(
                "Solo el propietario o un administrador puede realizar esta acción.".to_string(),
            ));
        }
        Ok(membership)
    }

    pub async fn create(pool: &SqlitePool, user_id: i64, input: &GrupoInput) -> AppResult<GrupoView> {
        let draft = input.validate()?;
        let now = Utc::now().timestamp();

        let mut tx = pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO grupos (name, description, grupo_type, default_currency, start_date, end_date,
                                 is_active, allow_new_members, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(&draft.grupo_type)
        .bind(&draft.default_currency)
        .bind(date_text(draft.start_date))
        .bind(date_text(draft.end_date))
        .bind(draft.is_active)
        .bind(draft.allow_new_members)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO grupo_memberships (grupo_id, user_id, role, is_active, joined_at)
             VALUES (?, ?, ?, TRUE, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(Role::Owner.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!("User {} created grupo {} ({})", user_id, id, draft.name);
        Self::get(pool, user_id, id).await
    }

    pub async fn update(
        pool: &SqlitePool,
        user_id: i64,
        id: i64,
        input: GrupoInput,
        partial: bool,
    ) -> AppResult<GrupoView> {
        Self::require_manager(pool, id, user_id).await?;
        let existing = Self::find(pool, id)
            .await?
            .ok_or_else(|| AppError::not_found("Grupo"))?;
        let input = if partial { input.overlay(&existing) } else { input };
        let draft: GrupoDraft = input.validate()?;

        sqlx::query(
            "UPDATE grupos SET name = ?, description = ?, grupo_type = ?, default_currency = ?,
                               start_date = ?, end_date = ?, is_active = ?, allow_new_members = ?,
                               updated_at = ?
             WHERE id = ?",
        )
        .bind(&draft.name)
        .bind(&draft.description)
        .bind(&draft.grupo_type)
        .bind(&draft.default_currency)
        .bind(date_text(draft.start_date))
        .bind(date_text(draft.end_date))
        .bind(draft.is_active)
        .bind(draft.allow_new_members)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;
        Self::get(pool, user_id, id).await
    }

    /// Owner only. Expenses stay with their authors, detached from the grupo.
    pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<()> {
        let membership = Self::require_member(pool, id, user_id).await?;
        if membership.role != Role::Owner {
            return Err(AppError::Forbidden(
                "Solo el propietario puede eliminar el grupo.".to_string(),
            ));
        }
        sqlx::query("DELETE FROM grupos WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        tracing::info!("User {} deleted grupo {}", user_id, id);
        Ok(())
    }

    pub async fn gastos(pool: &SqlitePool, grupo_id: i64) -> AppResult<Vec<Gasto>> {
        let rows = sqlx::query("SELECT * FROM gastos WHERE grupo_id = ? ORDER BY fecha_gasto DESC, id DESC")
            .bind(grupo_id)
            .fetch_all(pool)
            .await?;
        rows.iter().map(Gasto::from_row).collect()
    }

    pub async fn members(pool: &SqlitePool, grupo_id: i64) -> AppResult<Vec<GrupoMembership>> {
        let rows = sqlx::query(&format!(
            "{} WHERE m.grupo_id = ? ORDER BY m.joined_at, m.id",
            MEMBERSHIP_SELECT
        ))
        .bind(grupo_id)
        .fetch_all(pool)
        .await?;
        rows.iter().map(GrupoMembership::from_row).collect()
    }

    pub async fn stats(
        pool: &SqlitePool,
        user_id: i64,
        id: i64,
        today: NaiveDate,
    ) -> AppResult<GrupoStats> {
        let view = Self::get(pool, user_id, id).await?;
        let members = Self::members(pool, id).await?;
        let gastos = Self::gastos(pool, id).await?;
        Ok(grupo_stats(&view.grupo, &members, &gastos, today))
    }
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::db::test_pool;
    use crate::core::services::medio_pago::tests::insert_user;
    use serde_json::json;

    pub(crate) fn grupo_input(name: &str) -> GrupoInput {
        serde_json::from_value(json!({ "name": name, "grupo_type": "trip" })).unwrap()
    }

    #[tokio::test]
    async fn test_creator_becomes_owner() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let beto = insert_user(&pool, "beto").await;

        let view = GrupoService::create(&pool, ana, &grupo_input("Bariloche")).await.unwrap();
        assert_eq!(view.my_role, Some(Role::Owner));
        assert_eq!(view.member_count, 1);
        assert_eq!(view.total_expenses, 0.0);

        assert_eq!(GrupoService::list(&pool, ana).await.unwrap().len(), 1);
        assert!(GrupoService::list(&pool, beto).await.unwrap().is_empty());
        assert!(matches!(
            GrupoService::get(&pool, beto, view.grupo.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_permissions() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let beto = insert_user(&pool, "beto").await;
        let id = GrupoService::create(&pool, ana, &grupo_input("Casa")).await.unwrap().grupo.id;

        sqlx::query("INSERT INTO grupo_memberships (grupo_id, user_id, role, joined_at) VALUES (?, ?, 'member', 0)")
            .bind(id)
            .bind(beto)
            .execute(&pool)
            .await
            .unwrap();

        let patch: GrupoInput = serde_json::from_value(json!({ "description": "Gastos de la casa" })).unwrap();
        assert!(matches!(
            GrupoService::update(&pool, beto, id, patch.clone(), true).await,
            Err(AppError::Forbidden(_))
        ));
        let updated = GrupoService::update(&pool, ana, id, patch, true).await.unwrap();
        assert_eq!(updated.grupo.description, "Gastos de la casa");
        assert_eq!(updated.grupo.name, "Casa");
        assert_eq!(updated.member_count, 2);

        assert!(matches!(
            GrupoService::delete(&pool, beto, id).await,
            Err(AppError::Forbidden(_))
        ));
        GrupoService::delete(&pool, ana, id).await.unwrap();
        assert!(GrupoService::find(&pool, id).await.unwrap().is_none());
    }
}
