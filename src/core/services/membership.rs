use sqlx::SqlitePool;

use super::grupo::MEMBERSHIP_SELECT;
use super::GrupoService;
use crate::core::models::{GrupoMembership, MembershipUpdate, Role};
use crate::error::{AppError, AppResult};

pub struct MembershipService;

impl MembershipService {
    pub async fn list(pool: &SqlitePool, user_id: i64, grupo_id: i64) -> AppResult<Vec<GrupoMembership>> {
        GrupoService::require_member(pool, grupo_id, user_id).await?;
        GrupoService::members(pool, grupo_id).await
    }

    async fn by_id(pool: &SqlitePool, id: i64) -> AppResult<GrupoMembership> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?", MEMBERSHIP_SELECT))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Membresía"))?;
        GrupoMembership::from_row(&row)
    }

    /// Role and activation changes by an owner or admin.
    pub async fn update(
        pool: &SqlitePool,
        user_id: i64,
        id: i64,
        update: &MembershipUpdate,
    ) -> AppResult<GrupoMembership> {
        let target = Self::by_id(pool, id).await?;
        let caller = GrupoService::require_member(pool, target.grupo, user_id)
            .await
            .map_err(|_| AppError::not_found("Membresía"))?;
        if !caller.role.can_manage() {
            return Err(AppError::Forbidden(
                "Solo el propietario o un administrador puede modificar miembros.".to_string(),
            ));
        }

        let role = match update.role.as_deref() {
            None => None,
            Some(raw) => match Role::parse(raw) {
                Some(Role::Owner) => {
                    return Err(AppError::field("role", "No se puede asignar el rol de propietario."))
                }
                Some(role) => Some(role),
                None => {
                    return Err(AppError::field(
                        "role",
                        format!("\"{}\" no es una elección válida.", raw),
                    ))
                }
            },
        };

        if target.role == Role::Owner && (role.is_some() || update.is_active == Some(false)) {
            return Err(AppError::Forbidden(
                "No se puede modificar al propietario del grupo.".to_string(),
            ));
        }
        if caller.role == Role::Admin && target.role == Role::Admin && target.user != user_id {
            return Err(AppError::Forbidden(
                "Un administrador no puede modificar a otro administrador.".to_string(),
            ));
        }

        let role = role.unwrap_or(target.role);
        let is_active = update.is_active.unwrap_or(target.is_active);
        sqlx::query("UPDATE grupo_memberships SET role = ?, is_active = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(is_active)
            .bind(id)
            .execute(pool)
            .await?;
        tracing::info!(
            "User {} set membership {} to {} (active: {})",
            user_id,
            id,
            role.as_str(),
            is_active
        );
        Self::by_id(pool, id).await
    }

    /// Owners and admins remove others; anyone may leave. The owner stays.
    pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<()> {
        let target = Self::by_id(pool, id).await?;
        let caller = GrupoService::require_member(pool, target.grupo, user_id)
            .await
            .map_err(|_| AppError::not_found("Membresía"))?;

        if target.role == Role::Owner {
            return Err(AppError::Forbidden(
                "No se puede eliminar al propietario del grupo.".to_string(),
            ));
        }
        if target.user != user_id {
            if !caller.role.can_manage() {
                return Err(AppError::Forbidden(
                    "Solo el propietario o un administrador puede eliminar miembros.".to_string(),
                ));
            }
            if caller.role == Role::Admin && target.role == Role::Admin {
                return Err(AppError::Forbidden(
                    "Un administrador no puede eliminar a otro administrador.".to_string(),
                ));
            }
        }

        sqlx::query("DELETE FROM grupo_memberships WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        tracing::info!("User {} removed membership {}", user_id, id);
        Ok(())
    }
}
