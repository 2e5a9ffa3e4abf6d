//! Render rows back to CSV text.
//!
//! Used for mail attachments and by `vault export`. The header is the
//! union of every row's columns in first-seen order, so rows with
//! differing shapes still line up.

use std::path::Path;

use serde_json::Value;

use crate::config::Config;
use crate::db;
use crate::error::{Result, VaultError};
use crate::models::Row;
use crate::query::{select_rows, RecordQuery};
use crate::sqlite_store::SqliteStore;

/// Key carrying display-only provenance; never exported.
pub const METADATA_KEY: &str = "_metadata";

/// Serialize rows to CSV.
///
/// Absent values become empty cells and `null` is written as empty.
/// Non-string values use their JSON text. Lines are separated by `\n`
/// with no trailing newline; an empty slice yields `""`.
pub fn rows_to_csv(rows: &[Row]) -> Result<String> {
    if rows.is_empty() {
        return Ok(String::new());
    }

    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if key != METADATA_KEY && !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }

    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    wtr.write_record(&header).map_err(csv_error)?;
    for row in rows {
        let cells = header.iter().map(|key| cell_text(row.get(*key)));
        wtr.write_record(cells).map_err(csv_error)?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| VaultError::Io(e.into_error()))?;
    let mut text = String::from_utf8(bytes)
        .map_err(|e| VaultError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    if text.ends_with('\n') {
        text.pop();
    }
    Ok(text)
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn csv_error(e: csv::Error) -> VaultError {
    VaultError::Io(std::io::Error::other(e))
}

/// Export stored rows as CSV.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(
    config: &Config,
    query: &RecordQuery,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let rows = select_rows(&store, query).await;
    pool.close().await;

    let rows: Vec<Row> = rows?.into_iter().map(|r| r.data).collect();
    let csv = rows_to_csv(&rows)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &csv)?;
            eprintln!("Exported {} records to {}", rows.len(), path.display());
        }
        None => {
            println!("{}", csv);
        }
    }

    Ok(())
}
