//! CSV text → ordered rows.
//!
//! The first non-empty line is the header. Every following non-empty line
//! becomes one [`Row`] whose keys are the header cells, in header order.
//! Short lines simply omit their missing trailing columns; surplus cells
//! past the header width are dropped. A line of spaces, or a lone `""`,
//! is not empty and yields a row.

use csv::{ByteRecord, ReaderBuilder};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, VaultError};
use crate::models::Row;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parse CSV text into rows.
pub fn parse_csv(text: &str) -> Result<Vec<Row>> {
    parse_csv_bytes(text.as_bytes())
}

/// Parse raw uploaded bytes into rows. Content must be UTF-8.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<Vec<Row>> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for result in reader.byte_records() {
        let record = result.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            VaultError::Parse {
                line,
                message: e.to_string(),
                content: String::new(),
            }
        })?;

        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let cells = decode_cells(&record, line)?;

        match &header {
            None => header = Some(cells),
            Some(columns) => {
                if cells.len() > columns.len() {
                    debug!(
                        line,
                        extra = cells.len() - columns.len(),
                        "dropping cells past header width"
                    );
                }
                let row: Row = columns
                    .iter()
                    .zip(cells)
                    .map(|(column, cell)| (column.clone(), Value::String(cell)))
                    .collect();
                rows.push(row);
            }
        }
    }

    Ok(rows)
}

fn decode_cells(record: &ByteRecord, line: u64) -> Result<Vec<String>> {
    record
        .iter()
        .map(|cell| {
            std::str::from_utf8(cell)
                .map(str::to_string)
                .map_err(|e| VaultError::Parse {
                    line,
                    message: format!("invalid UTF-8: {}", e),
                    content: lossy_line(record),
                })
        })
        .collect()
}

fn lossy_line(record: &ByteRecord) -> String {
    record
        .iter()
        .map(|cell| String::from_utf8_lossy(cell).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}
