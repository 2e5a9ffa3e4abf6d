//! SQLite-backed [`Store`] implementation.
//!
//! Rows keep their column order by storing `data` as JSON text. The
//! `UNIQUE` constraints on `csv_files.filename` and `csv_records.hash`
//! decide every race; a violation of either is reported as
//! [`InsertOutcome::Duplicate`]. Any other constraint failure, such as a
//! primary key collision, is a storage error.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row as _;
use sqlx::SqlitePool;

use crate::error::{is_unique_violation_on, Result, VaultError};
use crate::models::{FileRecord, Row, StoredRow};
use crate::store::{InsertOutcome, Store};

const ROW_COLUMNS: &str = "id, file_id, data_json, hash, created_at";
const FILE_COLUMNS: &str = "id, filename, upload_date, record_count";

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn file_from_row(row: &SqliteRow) -> FileRecord {
    FileRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        upload_date: row.get("upload_date"),
        record_count: row.get("record_count"),
    }
}

fn stored_from_row(row: &SqliteRow) -> Result<StoredRow> {
    let data_json: String = row.get("data_json");
    let data: Row = serde_json::from_str(&data_json)
        .map_err(|e| VaultError::Storage(sqlx::Error::Decode(Box::new(e))))?;

    Ok(StoredRow {
        id: row.get("id"),
        file_id: row.get("file_id"),
        data,
        hash: row.get("hash"),
        created_at: row.get("created_at"),
    })
}

/// Map a violation of the `dedup_key` unique constraint to `Duplicate`.
fn guarded(
    result: std::result::Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
    dedup_key: &str,
) -> Result<InsertOutcome> {
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(e) if is_unique_violation_on(&e, dedup_key) => Ok(InsertOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_file(&self, filename: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM csv_files WHERE filename = ?",
            FILE_COLUMNS
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(file_from_row))
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<InsertOutcome> {
        let result = sqlx::query(
            "INSERT INTO csv_files (id, filename, upload_date, record_count) VALUES (?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.filename)
        .bind(file.upload_date)
        .bind(file.record_count)
        .execute(&self.pool)
        .await;

        guarded(result, "csv_files.filename")
    }

    async fn find_row_by_hash(&self, hash: &str) -> Result<Option<StoredRow>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM csv_records WHERE hash = ?",
            ROW_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stored_from_row).transpose()
    }

    async fn insert_row(&self, row: &StoredRow) -> Result<InsertOutcome> {
        let data_json = serde_json::to_string(&row.data)
            .map_err(|e| VaultError::Hash(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO csv_records (id, file_id, data_json, hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.file_id)
        .bind(&data_json)
        .bind(&row.hash)
        .bind(row.created_at)
        .execute(&self.pool)
        .await;

        guarded(result, "csv_records.hash")
    }

    async fn list_rows(&self) -> Result<Vec<StoredRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM csv_records ORDER BY created_at DESC, rowid DESC",
            ROW_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_from_row).collect()
    }

    async fn list_rows_for_file(&self, file_id: &str) -> Result<Vec<StoredRow>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM csv_records WHERE file_id = ? ORDER BY created_at DESC, rowid DESC",
            ROW_COLUMNS
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_from_row).collect()
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM csv_files ORDER BY upload_date ASC, rowid ASC",
            FILE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(file_from_row).collect())
    }

    async fn count_files(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM csv_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn count_rows(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM csv_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn latest_file(&self) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM csv_files ORDER BY upload_date DESC, rowid DESC LIMIT 1",
            FILE_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(file_from_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::apply_schema;
    use serde_json::json;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::open(&tmp.path().join("vault.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn file(id: &str, filename: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            filename: filename.to_string(),
            upload_date: 1,
            record_count: 1,
        }
    }

    fn stored(id: &str, hash: &str) -> StoredRow {
        StoredRow {
            id: id.to_string(),
            file_id: "f1".to_string(),
            data: json!({"k": id}).as_object().cloned().unwrap(),
            hash: hash.to_string(),
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn test_same_hash_is_duplicate() {
        let (_tmp, store) = store().await;
        store.insert_file(&file("f1", "a.csv")).await.unwrap();

        assert_eq!(
            store.insert_row(&stored("r1", "h")).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_row(&stored("r2", "h")).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_row_id_collision_is_storage_error() {
        let (_tmp, store) = store().await;
        store.insert_file(&file("f1", "a.csv")).await.unwrap();
        store.insert_row(&stored("r1", "h1")).await.unwrap();

        let err = store.insert_row(&stored("r1", "h2")).await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_uniqueness() {
        let (_tmp, store) = store().await;
        store.insert_file(&file("f1", "a.csv")).await.unwrap();

        assert_eq!(
            store.insert_file(&file("f2", "a.csv")).await.unwrap(),
            InsertOutcome::Duplicate
        );
        let err = store.insert_file(&file("f1", "b.csv")).await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));
    }
}
