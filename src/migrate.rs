use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Uploaded files, one per distinct filename
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS csv_files (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL UNIQUE,
            upload_date INTEGER NOT NULL,
            record_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Stored rows. UNIQUE(hash) is the authoritative duplicate guard.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS csv_records (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            data_json TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (file_id) REFERENCES csv_files(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_history (
            id TEXT PRIMARY KEY,
            recipients TEXT NOT NULL,
            subject TEXT NOT NULL,
            message TEXT NOT NULL,
            attachment_info TEXT NOT NULL DEFAULT '',
            sent_at INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('sent', 'failed')),
            error TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_csv_records_file_id ON csv_records(file_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_csv_records_created_at ON csv_records(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_csv_files_upload_date ON csv_files(upload_date DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_email_history_sent_at ON email_history(sent_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
