//! Ingestion pipeline orchestration.
//!
//! Coordinates the upload flow: validation → parse → fingerprint →
//! idempotent persist. Re-ingesting content that is already stored, under
//! any filename, only bumps the duplicate tally.
//!
//! There is no cross-row transaction. If storage fails midway, rows saved
//! earlier in the same call stay saved.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, IngestConfig};
use crate::db;
use crate::error::{Result, VaultError};
use crate::hash::RowHasher;
use crate::migrate;
use crate::models::{now_millis, FileRecord, IngestReport, Row, StoredRow};
use crate::parse::parse_csv_bytes;
use crate::sqlite_store::SqliteStore;
use crate::store::{InsertOutcome, Store};

/// Persist `rows` under `filename`, skipping any row whose fingerprint is
/// already stored anywhere.
///
/// Rows are processed in input order. Every row is fingerprinted before the
/// first write, so a hash failure leaves storage untouched.
pub async fn ingest(
    store: &dyn Store,
    hasher: &RowHasher,
    filename: &str,
    rows: &[Row],
) -> Result<IngestReport> {
    let hashes = rows
        .iter()
        .map(|row| hasher.hash(row))
        .collect::<Result<Vec<_>>>()?;

    let file = resolve_file(store, filename, rows.len()).await?;

    let mut report = IngestReport::unsaved(rows.len());

    for (row, hash) in rows.iter().zip(hashes) {
        if store.find_row_by_hash(&hash).await?.is_some() {
            report.duplicates += 1;
            continue;
        }

        let stored = StoredRow {
            id: Uuid::new_v4().to_string(),
            file_id: file.id.clone(),
            data: row.clone(),
            hash,
            created_at: now_millis(),
        };

        match store.insert_row(&stored).await? {
            InsertOutcome::Inserted => report.saved += 1,
            InsertOutcome::Duplicate => {
                // Another ingest stored the same content between our check and insert.
                debug!(hash = %stored.hash, "unique constraint hit, counting as duplicate");
                report.duplicates += 1;
            }
        }
    }

    info!(
        filename,
        saved = report.saved,
        duplicates = report.duplicates,
        total = report.total,
        "ingest complete"
    );

    Ok(report)
}

/// Find the file record for `filename`, creating it on first upload.
/// An existing record is reused as-is; its `record_count` is not touched.
async fn resolve_file(
    store: &dyn Store,
    filename: &str,
    record_count: usize,
) -> Result<FileRecord> {
    if let Some(existing) = store.find_file(filename).await? {
        return Ok(existing);
    }

    let file = FileRecord {
        id: Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        upload_date: now_millis(),
        record_count: record_count as i64,
    };

    match store.insert_file(&file).await? {
        InsertOutcome::Inserted => {
            info!(filename, record_count, "created file record");
            Ok(file)
        }
        InsertOutcome::Duplicate => store
            .find_file(filename)
            .await?
            .ok_or(VaultError::Storage(sqlx::Error::RowNotFound)),
    }
}

/// Result of an upload: the parsed rows are returned even when they could
/// not be persisted.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub filename: String,
    pub rows: Vec<Row>,
    pub report: IngestReport,
    /// False when storage failed and `report` is the zeroed fallback.
    pub persisted: bool,
}

/// Reject uploads that are missing, not CSV, or too large.
pub fn validate_upload(filename: &str, size: usize, max_bytes: usize) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(VaultError::validation("No file provided"));
    }
    if !filename.ends_with(".csv") {
        return Err(VaultError::validation("Only CSV files are supported"));
    }
    if size > max_bytes {
        return Err(VaultError::validation(format!(
            "File exceeds the {} byte upload limit",
            max_bytes
        )));
    }
    Ok(())
}

/// Validate, parse and ingest one uploaded file.
///
/// Validation and parse failures are returned as errors. Storage failures
/// are not: the parsed rows still come back, with `persisted = false`.
pub async fn upload(
    store: &dyn Store,
    settings: &IngestConfig,
    filename: &str,
    bytes: &[u8],
) -> Result<UploadOutcome> {
    validate_upload(filename, bytes.len(), settings.max_upload_bytes)?;

    let rows = parse_csv_bytes(bytes)?;
    info!(filename, rows = rows.len(), "parsed upload");

    let hasher = RowHasher::new(settings.hash_algorithm);
    let (report, persisted) = match ingest(store, &hasher, filename, &rows).await {
        Ok(report) => (report, true),
        Err(e) => {
            warn!(filename, error = %e, "could not persist upload, continuing without saving");
            (IngestReport::unsaved(rows.len()), false)
        }
    };

    Ok(UploadOutcome {
        filename: filename.to_string(),
        rows,
        report,
        persisted,
    })
}

/// CLI entry point for `vault upload <file>`.
pub async fn run_upload(config: &Config, path: &Path) -> anyhow::Result<()> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read upload file: {}", path.display()))?;

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let outcome = upload(&store, &config.ingest, &filename, &bytes).await;
    pool.close().await;
    let outcome = outcome?;

    println!("upload {}", outcome.filename);
    println!("  rows parsed: {}", outcome.rows.len());
    println!("  saved: {}", outcome.report.saved);
    println!("  duplicates: {}", outcome.report.duplicates);
    println!("  total: {}", outcome.report.total);
    if !outcome.persisted {
        println!("  warning: rows were not saved to the database");
    }
    println!("ok");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_csv;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    fn rows(csv: &str) -> Vec<Row> {
        parse_csv(csv).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_line_in_one_upload() {
        let store = InMemoryStore::new();
        let hasher = RowHasher::default();
        let input = rows("name,email\nJan,jan@x.com\nJan,jan@x.com");

        let report = ingest(&store, &hasher, "people.csv", &input).await.unwrap();
        assert_eq!(
            report,
            IngestReport {
                saved: 1,
                duplicates: 1,
                total: 2
            }
        );
        assert_eq!(store.list_rows().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_reingest() {
        let store = InMemoryStore::new();
        let hasher = RowHasher::default();
        let input = rows("a,b\n1,2\n3,4\n5,6\n");

        let first = ingest(&store, &hasher, "x.csv", &input).await.unwrap();
        assert_eq!(first.saved, 3);

        let second = ingest(&store, &hasher, "x.csv", &input).await.unwrap();
        assert_eq!(second.saved, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(second.total, 3);
        assert_eq!(store.count_rows().await.unwrap(), 3);
        assert_eq!(store.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cross_file_dedup_keeps_first_owner() {
        let store = InMemoryStore::new();
        let hasher = RowHasher::default();
        let input = rows("name\nAnna\n");

        ingest(&store, &hasher, "first.csv", &input).await.unwrap();
        let report = ingest(&store, &hasher, "second.csv", &input).await.unwrap();
        assert_eq!(report.saved, 0);
        assert_eq!(report.duplicates, 1);

        let first = store.find_file("first.csv").await.unwrap().unwrap();
        let stored = store.list_rows().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].file_id, first.id);
        // The second filename still gets its own file record.
        assert!(store.find_file("second.csv").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_count_set_once() {
        let store = InMemoryStore::new();
        let hasher = RowHasher::default();

        ingest(&store, &hasher, "f.csv", &rows("a\n1\n2\n")).await.unwrap();
        ingest(&store, &hasher, "f.csv", &rows("a\n1\n2\n3\n4\n"))
            .await
            .unwrap();

        let file = store.find_file("f.csv").await.unwrap().unwrap();
        assert_eq!(file.record_count, 2);
    }

    #[tokio::test]
    async fn test_column_order_does_not_defeat_dedup() {
        let store = InMemoryStore::new();
        let hasher = RowHasher::default();

        ingest(&store, &hasher, "a.csv", &rows("x,y\n1,2\n")).await.unwrap();
        let report = ingest(&store, &hasher, "b.csv", &rows("y,x\n2,1\n"))
            .await
            .unwrap();
        assert_eq!(report.duplicates, 1);
    }

    /// Store whose pre-check never sees anything, as if every row raced.
    struct BlindPrecheck(InMemoryStore);

    #[async_trait]
    impl Store for BlindPrecheck {
        async fn find_file(&self, filename: &str) -> Result<Option<FileRecord>> {
            self.0.find_file(filename).await
        }
        async fn insert_file(&self, file: &FileRecord) -> Result<InsertOutcome> {
            self.0.insert_file(file).await
        }
        async fn find_row_by_hash(&self, _hash: &str) -> Result<Option<StoredRow>> {
            Ok(None)
        }
        async fn insert_row(&self, row: &StoredRow) -> Result<InsertOutcome> {
            self.0.insert_row(row).await
        }
        async fn list_rows(&self) -> Result<Vec<StoredRow>> {
            self.0.list_rows().await
        }
        async fn list_rows_for_file(&self, file_id: &str) -> Result<Vec<StoredRow>> {
            self.0.list_rows_for_file(file_id).await
        }
        async fn list_files(&self) -> Result<Vec<FileRecord>> {
            self.0.list_files().await
        }
        async fn count_files(&self) -> Result<i64> {
            self.0.count_files().await
        }
        async fn count_rows(&self) -> Result<i64> {
            self.0.count_rows().await
        }
        async fn latest_file(&self) -> Result<Option<FileRecord>> {
            self.0.latest_file().await
        }
    }

    #[tokio::test]
    async fn test_constraint_violation_counts_as_duplicate() {
        let store = BlindPrecheck(InMemoryStore::new());
        let hasher = RowHasher::default();
        let input = rows("k\nv\nv\n");

        let report = ingest(&store, &hasher, "race.csv", &input).await.unwrap();
        assert_eq!(report.saved, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    /// Store that is always unreachable.
    struct Unreachable;

    #[async_trait]
    impl Store for Unreachable {
        async fn find_file(&self, _: &str) -> Result<Option<FileRecord>> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn insert_file(&self, _: &FileRecord) -> Result<InsertOutcome> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn find_row_by_hash(&self, _: &str) -> Result<Option<StoredRow>> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn insert_row(&self, _: &StoredRow) -> Result<InsertOutcome> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn list_rows(&self) -> Result<Vec<StoredRow>> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn list_rows_for_file(&self, _: &str) -> Result<Vec<StoredRow>> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn list_files(&self) -> Result<Vec<FileRecord>> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn count_files(&self) -> Result<i64> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn count_rows(&self) -> Result<i64> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
        async fn latest_file(&self) -> Result<Option<FileRecord>> {
            Err(VaultError::Storage(sqlx::Error::PoolClosed))
        }
    }

    #[tokio::test]
    async fn test_ingest_propagates_storage_error() {
        let err = ingest(&Unreachable, &RowHasher::default(), "f.csv", &rows("a\n1\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Storage(_)));
    }

    #[tokio::test]
    async fn test_upload_degrades_when_storage_fails() {
        let outcome = upload(
            &Unreachable,
            &IngestConfig::default(),
            "people.csv",
            b"name\nJan\nAnna\n",
        )
        .await
        .unwrap();

        assert!(!outcome.persisted);
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.report, IngestReport::unsaved(2));
    }

    #[tokio::test]
    async fn test_upload_rejects_non_csv() {
        let store = InMemoryStore::new();
        let err = upload(&store, &IngestConfig::default(), "notes.txt", b"a\n1\n")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        assert_eq!(store.count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_file_and_oversize() {
        let store = InMemoryStore::new();
        let err = upload(&store, &IngestConfig::default(), "", b"")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No file provided");

        let settings = IngestConfig {
            max_upload_bytes: 4,
            ..IngestConfig::default()
        };
        let err = upload(&store, &settings, "big.csv", b"a,b\n1,2\n")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_upload_parse_error_is_returned() {
        let store = InMemoryStore::new();
        let err = upload(&store, &IngestConfig::default(), "bad.csv", b"a\n\xFF\n")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_upload_returns_rows_and_report() {
        let store = InMemoryStore::new();
        let outcome = upload(
            &store,
            &IngestConfig::default(),
            "people.csv",
            b"name,email\nJan,jan@x.com\nJan,jan@x.com",
        )
        .await
        .unwrap();

        assert!(outcome.persisted);
        let expected = json!({"name": "Jan", "email": "jan@x.com"});
        assert_eq!(&outcome.rows[0], expected.as_object().unwrap());
        assert_eq!(outcome.report.saved, 1);
        assert_eq!(outcome.report.duplicates, 1);
    }
}
