use sqlx::SqlitePool;

use crate::core::models::{MedioPago, MedioPagoDraft, MedioPagoInput};
use crate::error::{AppError, AppResult};

pub struct MedioPagoService;

impl MedioPagoService {
    pub async fn list(pool: &SqlitePool, user_id: i64) -> AppResult<Vec<MedioPago>> {
        let rows = sqlx::query("SELECT * FROM medios_pago WHERE user_id = ? ORDER BY id")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
        rows.iter().map(MedioPago::from_row).collect()
    }

    /// Other users' records read as missing.
    pub async fn get(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<MedioPago> {
        let row = sqlx::query("SELECT * FROM medios_pago WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Medio de pago"))?;
        MedioPago::from_row(&row)
    }

    pub async fn create(pool: &SqlitePool, user_id: i64, input: &MedioPagoInput) -> AppResult<MedioPago> {
        let draft = input.validate()?;
        let id = sqlx::query(
            "INSERT INTO medios_pago (user_id, ente_emisor, tipo, tipo_tarjeta, extra) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&draft.ente_emisor)
        .bind(&draft.tipo)
        .bind(&draft.tipo_tarjeta)
        .bind(&draft.extra)
        .execute(pool)
        .await?
        .last_insert_rowid();
        tracing::debug!("User {} created medio de pago {}", user_id, id);
        Self::get(pool, user_id, id).await
    }

    /// `partial` merges the stored record under the request (PATCH).
    pub async fn update(
        pool: &SqlitePool,
        user_id: i64,
        id: i64,
        input: MedioPagoInput,
        partial: bool,
    ) -> AppResult<MedioPago> {
        let existing = Self::get(pool, user_id, id).await?;
        let input = if partial { input.overlay(&existing) } else { input };
        let draft: MedioPagoDraft = input.validate()?;
        sqlx::query(
            "UPDATE medios_pago SET ente_emisor = ?, tipo = ?, tipo_tarjeta = ?, extra = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(&draft.ente_emisor)
        .bind(&draft.tipo)
        .bind(&draft.tipo_tarjeta)
        .bind(&draft.extra)
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Self::get(pool, user_id, id).await
    }

    /// Deleting a payment method takes its expenses with it.
    pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM medios_pago WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Medio de pago"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::db::test_pool;

    pub(crate) async fn insert_user(pool: &SqlitePool, name: &str) -> i64 {
        sqlx::query(
            "INSERT INTO users (username, email, password_hash, date_joined) VALUES (?, ?, 'x', 0)",
        )
        .bind(name)
        .bind(format!("{}@mail.com", name))
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    pub(crate) fn visa() -> MedioPagoInput {
        MedioPagoInput {
            ente_emisor: Some("Galicia".into()),
            tipo: Some("TC".into()),
            tipo_tarjeta: Some("VISA".into()),
            extra: Some("terminada en 1234".into()),
        }
    }

    #[tokio::test]
    async fn test_crud_is_owner_scoped() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let beto = insert_user(&pool, "beto").await;

        let mp = MedioPagoService::create(&pool, ana, &visa()).await.unwrap();
        assert_eq!(mp.user, ana);
        assert_eq!(MedioPagoService::list(&pool, ana).await.unwrap().len(), 1);
        assert!(MedioPagoService::list(&pool, beto).await.unwrap().is_empty());
        assert!(matches!(
            MedioPagoService::get(&pool, beto, mp.id).await,
            Err(AppError::NotFound(_))
        ));

        let patch = MedioPagoInput {
            tipo: Some("EF".into()),
            ..Default::default()
        };
        let updated = MedioPagoService::update(&pool, ana, mp.id, patch, true).await.unwrap();
        assert_eq!(updated.tipo, "EF");
        assert_eq!(updated.tipo_tarjeta, None);
        assert_eq!(updated.ente_emisor, "Galicia");

        assert!(MedioPagoService::delete(&pool, beto, mp.id).await.is_err());
        MedioPagoService::delete(&pool, ana, mp.id).await.unwrap();
        assert!(MedioPagoService::list(&pool, ana).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_requires_all_fields() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let mp = MedioPagoService::create(&pool, ana, &visa()).await.unwrap();
        let put = MedioPagoInput {
            tipo: Some("TR".into()),
            ..Default::default()
        };
        assert!(matches!(
            MedioPagoService::update(&pool, ana, mp.id, put, false).await,
            Err(AppError::Validation(_))
        ));
    }
}
