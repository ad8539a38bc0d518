use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the index schema for the configured database and close the pool.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per (path, ordinal); embedding is NULL for lite chunks.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            title TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            heading TEXT NOT NULL,
            text TEXT NOT NULL,
            modified_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'note',
            confidence REAL NOT NULL DEFAULT 0.5,
            access_count INTEGER NOT NULL DEFAULT 0,
            embedding BLOB,
            PRIMARY KEY (path, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_type ON chunks(content_type)")
        .execute(pool)
        .await?;

    Ok(())
}
