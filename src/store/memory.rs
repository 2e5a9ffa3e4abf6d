//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Both collections live in `Vec`s behind a single `RwLock`, so the
//! uniqueness check and the push happen under one write guard.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FileRecord, StoredRow};

use super::{InsertOutcome, Store};

#[derive(Default)]
struct Collections {
    files: Vec<FileRecord>,
    /// Insertion order; newest last.
    rows: Vec<StoredRow>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the Vecs half-written,
    // so a poisoned guard is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Collections> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_file(&self, filename: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .read()
            .files
            .iter()
            .find(|f| f.filename == filename)
            .cloned())
    }

    async fn insert_file(&self, file: &FileRecord) -> Result<InsertOutcome> {
        let mut inner = self.write();
        if inner.files.iter().any(|f| f.filename == file.filename) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.files.push(file.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn find_row_by_hash(&self, hash: &str) -> Result<Option<StoredRow>> {
        Ok(self.read().rows.iter().find(|r| r.hash == hash).cloned())
    }

    async fn insert_row(&self, row: &StoredRow) -> Result<InsertOutcome> {
        let mut inner = self.write();
        if inner.rows.iter().any(|r| r.hash == row.hash) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.rows.push(row.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_rows(&self) -> Result<Vec<StoredRow>> {
        Ok(self.read().rows.iter().rev().cloned().collect())
    }

    async fn list_rows_for_file(&self, file_id: &str) -> Result<Vec<StoredRow>> {
        Ok(self
            .read()
            .rows
            .iter()
            .rev()
            .filter(|r| r.file_id == file_id)
            .cloned()
            .collect())
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        Ok(self.read().files.clone())
    }

    async fn count_files(&self) -> Result<i64> {
        Ok(self.read().files.len() as i64)
    }

    async fn count_rows(&self) -> Result<i64> {
        Ok(self.read().rows.len() as i64)
    }

    async fn latest_file(&self) -> Result<Option<FileRecord>> {
        // Later insertions win ties on upload_date.
        Ok(self
            .read()
            .files
            .iter()
            .enumerate()
            .max_by_key(|(i, f)| (f.upload_date, *i))
            .map(|(_, f)| f.clone()))
    }
}
