//! Storage abstraction for the Files and Records collections.
//!
//! The [`Store`] trait is the seam between the ingestion/query logic and a
//! concrete backend. Two implementations ship: [`memory::InMemoryStore`]
//! for tests and embedding, and [`crate::sqlite_store::SqliteStore`] for
//! the CLI and HTTP server.
//!
//! Backends must enforce uniqueness themselves: `filename` across files
//! and `hash` across all rows. The ingestion pre-check is only an
//! optimization; a write that loses a race reports
//! [`InsertOutcome::Duplicate`] instead of failing.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FileRecord, StoredRow};

/// Result of a write guarded by a unique constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The unique key already existed; nothing was written.
    Duplicate,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`find_file`](Store::find_file) | Look up a file by filename |
/// | [`insert_file`](Store::insert_file) | Create a file (unique filename) |
/// | [`find_row_by_hash`](Store::find_row_by_hash) | Duplicate pre-check |
/// | [`insert_row`](Store::insert_row) | Create a row (unique hash) |
/// | [`list_rows`](Store::list_rows) | All rows, newest first |
/// | [`list_rows_for_file`](Store::list_rows_for_file) | One file's rows, newest first |
/// | [`list_files`](Store::list_files) | All files |
/// | [`count_files`](Store::count_files) / [`count_rows`](Store::count_rows) | Totals |
/// | [`latest_file`](Store::latest_file) | File with the newest upload date |
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_file(&self, filename: &str) -> Result<Option<FileRecord>>;

    async fn insert_file(&self, file: &FileRecord) -> Result<InsertOutcome>;

    async fn find_row_by_hash(&self, hash: &str) -> Result<Option<StoredRow>>;

    async fn insert_row(&self, row: &StoredRow) -> Result<InsertOutcome>;

    async fn list_rows(&self) -> Result<Vec<StoredRow>>;

    async fn list_rows_for_file(&self, file_id: &str) -> Result<Vec<StoredRow>>;

    async fn list_files(&self) -> Result<Vec<FileRecord>>;

    async fn count_files(&self) -> Result<i64>;

    async fn count_rows(&self) -> Result<i64>;

    async fn latest_file(&self) -> Result<Option<FileRecord>>;
}
