use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector-store schema. Idempotent.
///
/// `dataset_meta` holds the id of the current build under key `index_id`;
/// every chunk row carries the id of the build that wrote it.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            index_id TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Datasets written before builds were stamped lack the column.
    let has_index_id: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('chunks') WHERE name = 'index_id'",
    )
    .fetch_one(pool)
    .await?;
    if has_index_id == 0 {
        sqlx::query("ALTER TABLE chunks ADD COLUMN index_id TEXT NOT NULL DEFAULT ''")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dataset_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_index_id ON chunks(index_id)")
        .execute(pool)
        .await?;

    Ok(())
}
