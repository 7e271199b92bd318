//! SQLite pool and migration helpers.

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
}

/// Run the embedded schema, statement by statement. Every statement is
/// `IF NOT EXISTS`, so reapplying on startup is safe.
pub async fn apply_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for stmt in INIT_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

/// A single-connection in-memory database with the schema applied.
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    apply_migrations(&pool).await.expect("schema");
    pool
}
