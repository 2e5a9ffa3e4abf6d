//! Read-side operations over stored rows.
//!
//! Listing, per-file filtering, free-text and per-field search, and
//! aggregate statistics. Everything here is read-only and unpaginated;
//! display layers truncate if they need to.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::models::{format_ts_iso, DatabaseStats, FileRecord, LatestFile, Row, StoredRow};
use crate::sqlite_store::SqliteStore;
use crate::store::Store;

/// Field name that means "search every column".
pub const ALL_FIELDS: &str = "all";

/// Every stored row, newest first.
pub async fn list_all(store: &dyn Store) -> Result<Vec<StoredRow>> {
    store.list_rows().await
}

/// Rows owned by `filename`, newest first. Unknown filenames yield nothing.
pub async fn list_by_file(store: &dyn Store, filename: &str) -> Result<Vec<StoredRow>> {
    match store.find_file(filename).await? {
        Some(file) => store.list_rows_for_file(&file.id).await,
        None => Ok(Vec::new()),
    }
}

/// Case-insensitive search.
///
/// With a `field` (other than `"all"`), `term` is a regex matched against
/// that column only; rows without the column never match. Without one,
/// `term` is a substring matched against the row's JSON text. An empty
/// term returns every row.
pub async fn search(store: &dyn Store, term: &str, field: Option<&str>) -> Result<Vec<StoredRow>> {
    if term.is_empty() {
        return list_all(store).await;
    }

    let matcher = RowMatcher::new(term, field);
    let rows = store.list_rows().await?;
    Ok(rows.into_iter().filter(|r| matcher.matches(&r.data)).collect())
}

/// Totals plus the most recently uploaded file.
pub async fn stats(store: &dyn Store) -> Result<DatabaseStats> {
    let total_files = store.count_files().await?;
    let total_records = store.count_rows().await?;
    let latest_file = store.latest_file().await?.map(|f| LatestFile {
        filename: f.filename,
        upload_date: format_ts_iso(f.upload_date),
    });

    Ok(DatabaseStats {
        total_files,
        total_records,
        latest_file,
    })
}

enum Pattern {
    Regex(Regex),
    /// Lowercased needle, used when the term is not a valid regex.
    Literal(String),
}

enum RowMatcher {
    Field { field: String, pattern: Pattern },
    Anywhere { needle: String },
}

impl RowMatcher {
    fn new(term: &str, field: Option<&str>) -> Self {
        match field {
            Some(f) if !f.is_empty() && f != ALL_FIELDS => {
                let pattern = match RegexBuilder::new(term).case_insensitive(true).build() {
                    Ok(re) => Pattern::Regex(re),
                    Err(_) => Pattern::Literal(term.to_lowercase()),
                };
                RowMatcher::Field {
                    field: f.to_string(),
                    pattern,
                }
            }
            _ => RowMatcher::Anywhere {
                needle: term.to_lowercase(),
            },
        }
    }

    fn matches(&self, data: &Row) -> bool {
        match self {
            RowMatcher::Field { field, pattern } => {
                let text = match data.get(field) {
                    None | Some(Value::Null) => return false,
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                match pattern {
                    Pattern::Regex(re) => re.is_match(&text),
                    Pattern::Literal(needle) => text.to_lowercase().contains(needle),
                }
            }
            RowMatcher::Anywhere { needle } => serde_json::to_string(data)
                .map(|json| json.to_lowercase().contains(needle))
                .unwrap_or(false),
        }
    }
}

// ============ Annotated views ============

/// A stored row flattened for display: the row's own columns plus a
/// `_metadata` object describing where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub data: Row,
    #[serde(rename = "_metadata")]
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub id: String,
    pub filename: String,
    pub upload_date: Option<String>,
    pub created_at: String,
    pub hash: String,
}

/// Join rows with their owning files.
pub async fn annotate(store: &dyn Store, rows: Vec<StoredRow>) -> Result<Vec<RecordView>> {
    let files: HashMap<String, FileRecord> = store
        .list_files()
        .await?
        .into_iter()
        .map(|f| (f.id.clone(), f))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| {
            let file = files.get(&row.file_id);
            RecordView {
                metadata: RecordMetadata {
                    id: row.id,
                    filename: file
                        .map(|f| f.filename.clone())
                        .unwrap_or_else(|| "Unknown".to_string()),
                    upload_date: file.map(|f| format_ts_iso(f.upload_date)),
                    created_at: format_ts_iso(row.created_at),
                    hash: row.hash,
                },
                data: row.data,
            }
        })
        .collect())
}

// ============ Combined read request ============

/// Read request as accepted by the HTTP read endpoint.
///
/// Precedence: `stats` > `search` > `filename` > everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordQuery {
    #[serde(default)]
    pub stats: bool,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone)]
pub enum QueryResult {
    Stats(DatabaseStats),
    Records(Vec<RecordView>),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Rows selected by `query`, ignoring its `stats` flag.
pub async fn select_rows(store: &dyn Store, query: &RecordQuery) -> Result<Vec<StoredRow>> {
    if let Some(term) = non_empty(&query.search) {
        search(store, term, non_empty(&query.field)).await
    } else if let Some(filename) = non_empty(&query.filename) {
        list_by_file(store, filename).await
    } else {
        list_all(store).await
    }
}

pub async fn run_query(store: &dyn Store, query: &RecordQuery) -> Result<QueryResult> {
    if query.stats {
        return Ok(QueryResult::Stats(stats(store).await?));
    }
    let rows = select_rows(store, query).await?;
    Ok(QueryResult::Records(annotate(store, rows).await?))
}

// ============ CLI entry points ============

/// CLI entry point for `vault records` and `vault search`.
pub async fn run_records(config: &Config, query: &RecordQuery) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let rows = select_rows(&store, query).await;
    let views = match rows {
        Ok(rows) => annotate(&store, rows).await,
        Err(e) => Err(e),
    };
    pool.close().await;
    let views = views?;

    if views.is_empty() {
        println!("No records.");
        return Ok(());
    }

    for (i, view) in views.iter().enumerate() {
        println!(
            "{}. [{}] {}",
            i + 1,
            view.metadata.filename,
            format_columns(&view.data)
        );
        println!("    hash: {}", view.metadata.hash);
        println!("    created: {}", view.metadata.created_at);
    }
    println!();
    println!("{} record(s)", views.len());

    Ok(())
}

fn format_columns(data: &Row) -> String {
    data.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-file breakdown for `vault stats`.
struct FileStats {
    filename: String,
    record_count: i64,
    stored_rows: usize,
    upload_date: i64,
}

/// CLI entry point for `vault stats`.
pub async fn run_stats(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let summary = stats(&store).await?;
    let files = store.list_files().await?;
    let rows = store.list_rows().await?;
    pool.close().await;

    let mut owned: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        *owned.entry(row.file_id.as_str()).or_default() += 1;
    }

    let mut file_stats: Vec<FileStats> = files
        .iter()
        .map(|f| FileStats {
            filename: f.filename.clone(),
            record_count: f.record_count,
            stored_rows: owned.get(f.id.as_str()).copied().unwrap_or(0),
            upload_date: f.upload_date,
        })
        .collect();
    file_stats.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("CSV Vault - Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Files:       {}", summary.total_files);
    println!("  Records:     {}", summary.total_records);
    match &summary.latest_file {
        Some(latest) => println!("  Latest file: {} ({})", latest.filename, latest.upload_date),
        None => println!("  Latest file: none"),
    }

    if !file_stats.is_empty() {
        println!();
        println!("  By file:");
        println!(
            "  {:<32} {:>8} {:>8}   {}",
            "FILE", "ROWS", "STORED", "UPLOADED"
        );
        println!("  {}", "-".repeat(72));

        for f in &file_stats {
            println!(
                "  {:<32} {:>8} {:>8}   {}",
                f.filename,
                f.record_count,
                f.stored_rows,
                format_ts_relative(f.upload_date)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format Unix milliseconds relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts_millis: i64) -> String {
    let delta = (chrono::Utc::now().timestamp_millis() - ts_millis) / 1000;

    if delta < 0 {
        return format_ts_iso(ts_millis);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts_millis)
    }
}
