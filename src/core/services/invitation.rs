//! Grupo invitations: token issue, listing and acceptance.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;

use super::user::is_valid_email;
use super::GrupoService;
use crate::core::models::{GrupoInvitation, GrupoMembership, InvitationInput, Role};
use crate::core::validation::{Validator, REQUIRED};
use crate::error::{AppError, AppResult};

const TOKEN_LEN: usize = 32;
const DEFAULT_EXPIRY_DAYS: i64 = 30;

fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub struct InvitationService;

impl InvitationService {
    pub async fn create(
        pool: &SqlitePool,
        user_id: i64,
        input: &InvitationInput,
        now: DateTime<Utc>,
    ) -> AppResult<GrupoInvitation> {
        let mut v = Validator::new();
        let grupo_id = match input.grupo.as_ref() {
            None => {
                v.error("grupo", REQUIRED);
                None
            }
            Some(_) => v.optional_id("grupo", input.grupo.as_ref()).flatten(),
        };
        if grupo_id.is_none() && !v.has_error("grupo") {
            v.error("grupo", REQUIRED);
        }
        let email = v.text("email", input.email.as_deref(), true, 254);
        if matches!(email.as_deref(), Some(e) if !is_valid_email(e)) {
            v.error("email", "Introduzca una dirección de correo electrónico válida.");
        }
        let expires_at = match input.expires_at.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Some(now + Duration::days(DEFAULT_EXPIRY_DAYS)),
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(at) if at.with_timezone(&Utc) > now => Some(at.with_timezone(&Utc)),
                Ok(_) => {
                    v.error("expires_at", "La fecha de expiración debe ser futura.");
                    None
                }
                Err(_) => {
                    v.error("expires_at", "Formato de fecha inválido.");
                    None
                }
            },
        };
        let (grupo_id, email, expires_at) = match (grupo_id, email, expires_at) {
            (Some(g), Some(e), Some(x)) if v.is_ok() => (g, e, x),
            _ => return Err(v.into_error()),
        };

        GrupoService::require_manager(pool, grupo_id, user_id).await?;
        let grupo = GrupoService::find(pool, grupo_id)
            .await?
            .ok_or_else(|| AppError::not_found("Grupo"))?;
        if !grupo.is_active || !grupo.allow_new_members {
            return Err(AppError::BadRequest(
                "El grupo no está aceptando nuevos miembros.".to_string(),
            ));
        }

        let id = sqlx::query(
            "INSERT INTO grupo_invitations (grupo_id, email, invited_by, invitation_token, expires_at, is_used, created_at)
             VALUES (?, ?, ?, ?, ?, FALSE, ?)",
        )
        .bind(grupo_id)
        .bind(email.to_lowercase())
        .bind(user_id)
        .bind(new_token())
        .bind(expires_at.timestamp())
        .bind(now.timestamp())
        .execute(pool)
        .await?
        .last_insert_rowid();
        tracing::info!("User {} invited {} to grupo {}", user_id, email, grupo_id);
        Self::by_id(pool, id, now).await
    }

    async fn by_id(pool: &SqlitePool, id: i64, now: DateTime<Utc>) -> AppResult<GrupoInvitation> {
        let row = sqlx::query("SELECT * FROM grupo_invitations WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Invitación"))?;
        GrupoInvitation::from_row(&row, now)
    }

    /// Invitations of one grupo, or of every grupo the caller belongs to.
    pub async fn list(
        pool: &SqlitePool,
        user_id: i64,
        grupo_id: Option<i64>,
        pending_only: bool,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<GrupoInvitation>> {
        let rows = match grupo_id {
            Some(grupo_id) => {
                GrupoService::require_member(pool, grupo_id, user_id).await?;
                sqlx::query("SELECT * FROM grupo_invitations WHERE grupo_id = ? ORDER BY created_at DESC, id DESC")
                    .bind(grupo_id)
                    .fetch_all(pool)
                    .await?
            }
            None => {
                sqlx::query(
                    "SELECT i.* FROM grupo_invitations i
                     JOIN grupo_memberships m ON m.grupo_id = i.grupo_id AND m.user_id = ? AND m.is_active = TRUE
                     ORDER BY i.created_at DESC, i.id DESC",
                )
                .bind(user_id)
                .fetch_all(pool)
                .await?
            }
        };
        let invitations = rows
            .iter()
            .map(|row| GrupoInvitation::from_row(row, now))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(invitations
            .into_iter()
            .filter(|i| !pending_only || i.is_pending())
            .collect())
    }

    /// Cancels an invitation. Owner/admin of its grupo only.
    pub async fn delete(pool: &SqlitePool, user_id: i64, id: i64) -> AppResult<()> {
        let invitation = Self::by_id(pool, id, Utc::now()).await?;
        GrupoService::require_manager(pool, invitation.grupo, user_id)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => AppError::not_found("Invitación"),
                other => other,
            })?;
        sqlx::query("DELETE FROM grupo_invitations WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Joins the caller to the invitation's grupo as a `member`.
    pub async fn accept(
        pool: &SqlitePool,
        user_id: i64,
        token: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GrupoMembership> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::field("token", REQUIRED));
        }
        let row = sqlx::query("SELECT * FROM grupo_invitations WHERE invitation_token = ?")
            .bind(token)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::BadRequest("Invitación inválida.".to_string()))?;
        let invitation = GrupoInvitation::from_row(&row, now)?;
        if invitation.is_used {
            return Err(AppError::BadRequest("Esta invitación ya fue utilizada.".to_string()));
        }
        if invitation.is_expired {
            return Err(AppError::BadRequest("Esta invitación ha expirado.".to_string()));
        }

        let grupo = GrupoService::find(pool, invitation.grupo)
            .await?
            .ok_or_else(|| AppError::BadRequest("Invitación inválida.".to_string()))?;
        if !grupo.is_active || !grupo.allow_new_members {
            return Err(AppError::BadRequest(
                "El grupo no está aceptando nuevos miembros.".to_string(),
            ));
        }

        let existing = GrupoService::membership(pool, grupo.id, user_id).await?;
        if matches!(&existing, Some(m) if m.is_active) {
            return Err(AppError::BadRequest("Ya es miembro de este grupo.".to_string()));
        }

        let mut tx = pool.begin().await?;
        // claim the token first: a concurrent accept loses here
        let claimed = sqlx::query(
            "UPDATE grupo_invitations SET is_used = TRUE
             WHERE id = ? AND is_used = FALSE AND expires_at > ?",
        )
        .bind(invitation.id)
        .bind(now.timestamp())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed != 1 {
            tx.rollback().await?;
            return Err(AppError::BadRequest("Esta invitación ya fue utilizada.".to_string()));
        }
        match existing {
            Some(m) => {
                sqlx::query("UPDATE grupo_memberships SET role = ?, is_active = TRUE, joined_at = ? WHERE id = ?")
                    .bind(Role::Member.as_str())
                    .bind(now.timestamp())
                    .bind(m.id)
                    .execute(&mut *tx)
                    .await?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO grupo_memberships (grupo_id, user_id, role, is_active, joined_at)
                     VALUES (?, ?, ?, TRUE, ?)",
                )
                .bind(grupo.id)
                .bind(user_id)
                .bind(Role::Member.as_str())
                .bind(now.timestamp())
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        tracing::info!("User {} joined grupo {} by invitation", user_id, grupo.id);
        GrupoService::require_member(pool, grupo.id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dates::from_timestamp;
    use crate::core::db::test_pool;
    use crate::core::services::grupo::tests::grupo_input;
    use crate::core::services::medio_pago::tests::insert_user;
    use serde_json::json;

    fn invite(grupo: i64, email: &str) -> InvitationInput {
        InvitationInput {
            grupo: Some(json!(grupo)),
            email: Some(email.into()),
            expires_at: None,
        }
    }

    #[test]
    fn test_token_shape() {
        let token = new_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, new_token());
    }

    #[tokio::test]
    async fn test_invite_and_accept() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let beto = insert_user(&pool, "beto").await;
        let grupo = GrupoService::create(&pool, ana, &grupo_input("Viaje")).await.unwrap().grupo.id;
        // whole seconds, as stored
        let now = from_timestamp(Utc::now().timestamp());

        assert!(matches!(
            InvitationService::create(&pool, beto, &invite(grupo, "beto@mail.com"), now).await,
            Err(AppError::NotFound(_))
        ));

        let inv = InvitationService::create(&pool, ana, &invite(grupo, "beto@mail.com"), now)
            .await
            .unwrap();
        assert_eq!(inv.invitation_token.len(), 32);
        assert!(inv.is_pending());
        assert_eq!((inv.expires_at - now).num_days(), 30);

        let membership = InvitationService::accept(&pool, beto, &inv.invitation_token, now)
            .await
            .unwrap();
        assert_eq!(membership.role, Role::Member);
        assert!(matches!(
            InvitationService::accept(&pool, beto, &inv.invitation_token, now).await,
            Err(AppError::BadRequest(_))
        ));

        let pending = InvitationService::list(&pool, beto, Some(grupo), true, now).await.unwrap();
        assert!(pending.is_empty());
        assert_eq!(InvitationService::list(&pool, beto, None, false, now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_use_the_token_once() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let beto = insert_user(&pool, "beto").await;
        let caro = insert_user(&pool, "caro").await;
        let grupo = GrupoService::create(&pool, ana, &grupo_input("Viaje")).await.unwrap().grupo.id;
        let now = from_timestamp(Utc::now().timestamp());
        let inv = InvitationService::create(&pool, ana, &invite(grupo, "beto@mail.com"), now)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            InvitationService::accept(&pool, beto, &inv.invitation_token, now),
            InvitationService::accept(&pool, caro, &inv.invitation_token, now),
        );
        let joined = [first.is_ok(), second.is_ok()];
        assert_eq!(joined.iter().filter(|ok| **ok).count(), 1);
        for result in [first, second] {
            if let Err(e) = result {
                assert!(matches!(e, AppError::BadRequest(ref d) if d == "Esta invitación ya fue utilizada."));
            }
        }
        assert_eq!(GrupoService::members(&pool, grupo).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expiry_and_closed_grupo() {
        let pool = test_pool().await;
        let ana = insert_user(&pool, "ana").await;
        let beto = insert_user(&pool, "beto").await;
        let grupo = GrupoService::create(&pool, ana, &grupo_input("Viaje")).await.unwrap().grupo.id;
        let now = Utc::now();

        let mut past = invite(grupo, "beto@mail.com");
        past.expires_at = Some((now - Duration::hours(1)).to_rfc3339());
        assert!(matches!(
            InvitationService::create(&pool, ana, &past, now).await,
            Err(AppError::Validation(_))
        ));

        let inv = InvitationService::create(&pool, ana, &invite(grupo, "beto@mail.com"), now)
            .await
            .unwrap();
        let later = now + Duration::days(31);
        match InvitationService::accept(&pool, beto, &inv.invitation_token, later).await {
            Err(AppError::BadRequest(detail)) => assert_eq!(detail, "Esta invitación ha expirado."),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }

        sqlx::query("UPDATE grupos SET allow_new_members = FALSE WHERE id = ?")
            .bind(grupo)
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            InvitationService::create(&pool, ana, &invite(grupo, "caro@mail.com"), now).await,
            Err(AppError::BadRequest(_))
        ));

        InvitationService::delete(&pool, ana, inv.id).await.unwrap();
        assert!(InvitationService::list(&pool, ana, Some(grupo), false, now).await.unwrap().is_empty());
    }
}
