use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::StorageError;

const INITIAL_SCHEMA: &str = include_str!("../migrations/0001_initial_schema.sql");
const AUTH_KEYS_SCHEMA: &str = include_str!("../migrations/0002_auth_keys.sql");
const SANDBOX_SLOT_SCHEMA: &str = include_str!("../migrations/0003_sandbox_slot.sql");
const MIGRATIONS: &[&str] = &[INITIAL_SCHEMA, AUTH_KEYS_SCHEMA, SANDBOX_SLOT_SCHEMA];

/// Opens a SQLite pool for `database_url` and applies the initial schema.
///
/// `database_url` is expected in `sqlite:<path>` form, including the
/// `sqlite::memory:` form used by tests.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StorageError> {
    debug!(database_url, "connecting to database");

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(database_url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await.ok();
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

    run_migrations(&pool).await?;

    info!("database connection established");
    Ok(pool)
}

/// Applies the schema to an already-open pool. Idempotent: every statement
/// uses `CREATE TABLE IF NOT EXISTS` / `CREATE INDEX IF NOT EXISTS`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StorageError> {
    for schema in MIGRATIONS {
        for statement in split_statements(schema) {
            sqlx::query(statement).execute(pool).await?;
        }
    }
    Ok(())
}

fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_pool_applies_schema() {
        let pool = connect("sqlite::memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sandboxes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
    }
}
