//! Core data models used throughout the vault.
//!
//! A [`Row`] is schemaless: its columns come from whatever header the
//! uploaded CSV carried. [`FileRecord`] and [`StoredRow`] are the two
//! persisted collections the ingestion pipeline writes to.

use serde::{Deserialize, Serialize};

/// One parsed CSV line as an ordered column-name → value mapping.
///
/// Key order follows the CSV header. Parser output values are always
/// strings; rows arriving from JSON (e.g. mail attachments) may carry
/// other scalar types.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Metadata about one uploaded CSV file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub filename: String,
    /// Unix milliseconds of the first upload under this filename.
    pub upload_date: i64,
    /// Row count of the first upload. Never updated afterwards.
    pub record_count: i64,
}

/// A persisted data row plus its content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRow {
    pub id: String,
    pub file_id: String,
    pub data: Row,
    pub hash: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// Outcome tallies of a single ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IngestReport {
    pub saved: u64,
    pub duplicates: u64,
    pub total: u64,
}

impl IngestReport {
    /// Report for rows that were parsed but never reached storage.
    pub fn unsaved(total: usize) -> Self {
        Self {
            saved: 0,
            duplicates: 0,
            total: total as u64,
        }
    }
}

/// Aggregate statistics over the stored collections.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total_files: i64,
    pub total_records: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_file: Option<LatestFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestFile {
    pub filename: String,
    /// ISO 8601.
    pub upload_date: String,
}

/// An address-book entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating a contact.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailStatus {
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Sent => "sent",
            EmailStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "sent" {
            EmailStatus::Sent
        } else {
            EmailStatus::Failed
        }
    }
}

/// One line of the outgoing mail log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailHistoryEntry {
    pub id: String,
    pub to: String,
    pub subject: String,
    pub message: String,
    pub attachment_info: String,
    pub sent_at: String,
    pub status: EmailStatus,
    pub error: String,
}

/// Format Unix milliseconds as ISO 8601 (UTC, millisecond precision).
pub fn format_ts_iso(ts_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_millis)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| ts_millis.to_string())
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
