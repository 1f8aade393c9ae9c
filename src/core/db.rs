use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::AppResult;

const SCHEMA: &[(&str, &str)] = &[
    (
        "users",
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            email TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            is_staff BOOLEAN NOT NULL DEFAULT FALSE,
            date_joined INTEGER NOT NULL,
            last_login INTEGER
        );",
    ),
    (
        "users_email_index",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users (lower(email));",
    ),
    (
        "medios_pago",
        "CREATE TABLE IF NOT EXISTS medios_pago (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            ente_emisor TEXT NOT NULL,
            tipo TEXT NOT NULL,
            tipo_tarjeta TEXT,
            extra TEXT NOT NULL DEFAULT ''
        );",
    ),
    (
        "grupos",
        "CREATE TABLE IF NOT EXISTS grupos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            grupo_type TEXT NOT NULL DEFAULT 'shared',
            default_currency TEXT NOT NULL DEFAULT 'ARS',
            start_date TEXT,
            end_date TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            allow_new_members BOOLEAN NOT NULL DEFAULT TRUE,
            created_by INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );",
    ),
    (
        "gastos",
        "CREATE TABLE IF NOT EXISTS gastos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            monto REAL NOT NULL,
            moneda TEXT NOT NULL DEFAULT 'ARS',
            pagos_realizados INTEGER NOT NULL DEFAULT 0,
            pagos_totales INTEGER NOT NULL DEFAULT 1,
            medio_pago_id INTEGER NOT NULL REFERENCES medios_pago (id) ON DELETE CASCADE,
            vendedor TEXT NOT NULL,
            categoria TEXT NOT NULL DEFAULT 'otros',
            comentarios TEXT NOT NULL DEFAULT '',
            fecha_gasto TEXT NOT NULL,
            grupo_id INTEGER REFERENCES grupos (id) ON DELETE SET NULL,
            created_at INTEGER NOT NULL
        );",
    ),
    (
        "gastos_user_index",
        "CREATE INDEX IF NOT EXISTS idx_gastos_user ON gastos (user_id, fecha_gasto);",
    ),
    (
        "grupo_memberships",
        "CREATE TABLE IF NOT EXISTS grupo_memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            grupo_id INTEGER NOT NULL REFERENCES grupos (id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            role TEXT NOT NULL DEFAULT 'member',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            joined_at INTEGER NOT NULL,
            UNIQUE (grupo_id, user_id)
        );",
    ),
    (
        "grupo_invitations",
        "CREATE TABLE IF NOT EXISTS grupo_invitations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            grupo_id INTEGER NOT NULL REFERENCES grupos (id) ON DELETE CASCADE,
            email TEXT NOT NULL,
            invited_by INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            invitation_token TEXT UNIQUE NOT NULL,
            expires_at INTEGER NOT NULL,
            is_used BOOLEAN NOT NULL DEFAULT FALSE,
            created_at INTEGER NOT NULL
        );",
    ),
    (
        "token_activity",
        "CREATE TABLE IF NOT EXISTS token_activity (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            token_jti TEXT UNIQUE NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            last_activity INTEGER NOT NULL,
            ip_address TEXT,
            user_agent TEXT NOT NULL DEFAULT '',
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        );",
    ),
    (
        "token_activity_index",
        "CREATE INDEX IF NOT EXISTS idx_token_activity_user ON token_activity (user_id, is_active, last_activity);",
    ),
    (
        "token_blacklist",
        "CREATE TABLE IF NOT EXISTS token_blacklist (
            jti TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            token_hash TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            blacklisted_at INTEGER NOT NULL
        );",
    ),
    (
        "login_attempts",
        "CREATE TABLE IF NOT EXISTS login_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL,
            successful BOOLEAN NOT NULL DEFAULT FALSE,
            created_at INTEGER NOT NULL,
            last_cleanup_at INTEGER
        );",
    ),
    (
        "login_attempts_index",
        "CREATE INDEX IF NOT EXISTS idx_login_attempts_identifier ON login_attempts (identifier, created_at);",
    ),
    (
        "configs",
        "CREATE TABLE IF NOT EXISTS configs (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    ),
];

pub async fn init_db(data_dir: &Path) -> AppResult<SqlitePool> {
    let db_path = data_dir.join("gastos.db");
    let db_url = format!("sqlite:{}", db_path.to_string_lossy());
    let pool = init_pool(&db_url, 5).await?;
    tracing::debug!("Database ready at {:?}", db_path);
    Ok(pool)
}

pub async fn init_pool(db_url: &str, max_connections: u32) -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> AppResult<()> {
    for (name, ddl) in SCHEMA {
        sqlx::query(ddl).execute(pool).await.map_err(|e| {
            tracing::error!("Failed to create {}: {}", name, e);
            e
        })?;
    }
    Ok(())
}

/// Single-connection in-memory database. The pool must never recycle its
/// connection or the schema is lost.
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = test_pool().await;
        migrate(&pool).await.unwrap();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name IN
             ('users', 'gastos', 'medios_pago', 'grupos', 'grupo_memberships',
              'grupo_invitations', 'token_activity', 'token_blacklist', 'login_attempts', 'configs')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 10);
    }

    #[tokio::test]
    async fn test_init_db_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_db(dir.path()).await.unwrap();
        pool.close().await;
        assert!(dir.path().join("gastos.db").exists());
    }
}
