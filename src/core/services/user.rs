//! Accounts: registration rules, lookup by username or email, staff creation.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::auth::password::hash_password;
use crate::core::models::{RegisterInput, User};
use crate::core::validation::Validator;
use crate::error::{AppError, AppResult};

const MIN_PASSWORD_LEN: usize = 8;

pub struct UserService;

impl UserService {
    pub async fn register(pool: &SqlitePool, input: &RegisterInput) -> AppResult<User> {
        let mut v = Validator::new();
        let username = v.text("username", input.username.as_deref(), true, 150);
        if let Some(name) = username.as_deref() {
            if !is_valid_username(name) {
                v.error(
                    "username",
                    "Ingrese un nombre de usuario válido. Este valor puede contener sólo letras, números y los caracteres @/./+/-/_.",
                );
            } else if Self::find_by_username(pool, name).await?.is_some() {
                v.error("username", "Ya existe un usuario con este nombre.");
            }
        }

        let email = v.text("email", input.email.as_deref(), true, 254);
        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                v.error("email", "Introduzca una dirección de correo electrónico válida.");
            } else if Self::find_by_email(pool, email).await?.is_some() {
                v.error("email", "Ya existe un usuario con este email.");
            }
        }

        let password = input.password.clone().unwrap_or_default();
        for message in password_problems(&password, username.as_deref()) {
            v.error("password", message);
        }

        match (username, email) {
            (Some(username), Some(email)) if v.is_ok() => {
                Self::insert(pool, &username, &email, &password, false).await
            }
            _ => Err(v.into_error()),
        }
    }

    /// Used by the `create-staff` command. Skips the strength rules.
    pub async fn create_staff(
        pool: &SqlitePool,
        username: &str,
        email: &str,
        password: &str,
    ) -> AppResult<User> {
        if Self::find_by_username(pool, username).await?.is_some() {
            return Err(AppError::field("username", "Ya existe un usuario con este nombre."));
        }
        Self::insert(pool, username, email, password, true).await
    }

    async fn insert(
        pool: &SqlitePool,
        username: &str,
        email: &str,
        password: &str,
        is_staff: bool,
    ) -> AppResult<User> {
        let hash = hash_password(password)?;
        let id = sqlx::query(
            "INSERT INTO users (username, email, password_hash, is_staff, date_joined)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(email)
        .bind(hash)
        .bind(is_staff)
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?
        .last_insert_rowid();

        tracing::info!("Registered user {} (id {})", username, id);
        Self::get(pool, id).await
    }

    pub async fn get(pool: &SqlitePool, id: i64) -> AppResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Usuario"))?;
        User::from_row(&row)
    }

    pub async fn find_by_username(pool: &SqlitePool, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(User::from_row).transpose()
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE lower(email) = lower(?)")
            .bind(email)
            .fetch_optional(pool)
            .await?;
        row.as_ref().map(User::from_row).transpose()
    }

    /// Username first, then email.
    pub async fn find_by_login(pool: &SqlitePool, identifier: &str) -> AppResult<Option<User>> {
        match Self::find_by_username(pool, identifier).await? {
            Some(user) => Ok(Some(user)),
            None if identifier.contains('@') => Self::find_by_email(pool, identifier).await,
            None => Ok(None),
        }
    }

    pub async fn touch_login(pool: &SqlitePool, id: i64, now: i64) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

fn is_valid_username(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || "@.+_-".contains(c))
}

/// `local@domain.tld` with no whitespace and a single `@`.
pub(crate) fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && matches!(domain.rsplit_once('.'), Some((host, tld)) if !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

fn password_problems(password: &str, username: Option<&str>) -> Vec<&'static str> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LEN {
        problems.push("La contraseña es demasiado corta. Debe contener al menos 8 caracteres.");
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("La contraseña consiste sólo de números.");
    }
    if matches!(username, Some(u) if u.eq_ignore_ascii_case(password)) {
        problems.push("La contraseña es demasiado similar al nombre de usuario.");
    }
    problems
}
