//! Outgoing mail: composing messages, handing them to a transport, and
//! keeping a history of every attempt.
//!
//! # Transport
//!
//! Delivery goes through the [`Mailer`] trait. The shipped
//! [`SpoolMailer`] renders each message as a MIME `.eml` file in the
//! configured spool directory, where a local MTA (or a human) picks it
//! up. Anything that can deliver an [`OutgoingEmail`] can be plugged in.
//!
//! # History
//!
//! [`send_email`] writes one `email_history` row per attempt, marked
//! `sent` or `failed`. A history write failure is logged and does not
//! change the outcome reported to the caller.

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use serde::Deserialize;
use sqlx::Row as _;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::{Config, MailConfig};
use crate::contacts::get_contact;
use crate::db;
use crate::error::{Result, VaultError};
use crate::export::rows_to_csv;
use crate::models::{format_ts_iso, now_millis, EmailHistoryEntry, EmailStatus, Row};
use crate::query::{select_rows, RecordQuery};
use crate::sqlite_store::SqliteStore;

/// History entries returned when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

static RECIPIENT_FORMAT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

fn is_valid_recipient(addr: &str) -> bool {
    RECIPIENT_FORMAT.as_ref().is_some_and(|re| re.is_match(addr))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A fully composed message, ready for a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
}

/// Mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand off a message. Returns the transport's message id.
    async fn send(&self, message: &OutgoingEmail) -> Result<String>;
}

// ============ Spool transport ============

/// Writes each message to `<dir>/<id>.eml`.
pub struct SpoolMailer {
    dir: PathBuf,
}

impl SpoolMailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &MailConfig) -> Self {
        Self::new(config.spool_dir.clone())
    }
}

#[async_trait]
impl Mailer for SpoolMailer {
    async fn send(&self, message: &OutgoingEmail) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let message_id = format!("<{}@csv-vault>", id);
        let rendered = render_mime(message, &message_id, chrono::Utc::now());

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| VaultError::Mail(format!("cannot create spool dir: {}", e)))?;
        let path = self.dir.join(format!("{}.eml", id));
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| VaultError::Mail(format!("cannot write {}: {}", path.display(), e)))?;

        tracing::debug!(path = %path.display(), "message spooled");
        Ok(message_id)
    }
}

fn header_value(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if flat.is_ascii() {
        flat
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(flat.as_bytes()))
    }
}

fn base64_lines(bytes: &[u8]) -> String {
    let encoded = STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(76)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Render a multipart/mixed MIME message with CRLF line endings.
pub fn render_mime(
    message: &OutgoingEmail,
    message_id: &str,
    date: chrono::DateTime<chrono::Utc>,
) -> String {
    let boundary = format!("vault-{}", Uuid::new_v4().simple());
    let mut out = String::new();

    let mut push = |line: &str| {
        out.push_str(line);
        out.push_str("\r\n");
    };

    push(&format!("From: {}", header_value(&message.from)));
    push(&format!("To: {}", header_value(&message.to.join(", "))));
    push(&format!("Subject: {}", header_value(&message.subject)));
    push(&format!("Date: {}", date.to_rfc2822()));
    push(&format!("Message-ID: {}", message_id));
    push("MIME-Version: 1.0");
    push(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"",
        boundary
    ));
    push("");

    push(&format!("--{}", boundary));
    push("Content-Type: text/html; charset=utf-8");
    push("Content-Transfer-Encoding: base64");
    push("");
    push(&base64_lines(message.html.as_bytes()));

    for attachment in &message.attachments {
        let name = header_value(&attachment.filename).replace('"', "");
        push(&format!("--{}", boundary));
        push(&format!(
            "Content-Type: {}; name=\"{}\"",
            attachment.content_type, name
        ));
        push(&format!(
            "Content-Disposition: attachment; filename=\"{}\"",
            name
        ));
        push("Content-Transfer-Encoding: base64");
        push("");
        push(&base64_lines(&attachment.content));
    }

    push(&format!("--{}--", boundary));
    out
}

// ============ Composing and sending ============

/// Send request as accepted over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Rows to attach as CSV. `_metadata` keys are dropped.
    #[serde(default, rename = "attachData")]
    pub attach_data: Option<Vec<Row>>,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SentEmail {
    pub message_id: String,
    pub recipients: Vec<String>,
    pub attachment_info: String,
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_html(product: &str, subject: &str, message: &str, sent_at: &str) -> String {
    let body = html_escape(message)
        .replace("\r\n", "\n")
        .replace('\n', "<br>");
    let product = html_escape(product);

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{subject}</title></head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #2563eb;">{product}</h2>
    <div>{body}</div>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="font-size: 12px; color: #666;">Sent from {product} on {sent_at}</p>
  </div>
</body>
</html>"#,
        subject = html_escape(subject),
        product = product,
        body = body,
        sent_at = sent_at,
    )
}

fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Validate, compose, send, and record one message.
pub async fn send_email(
    pool: &SqlitePool,
    mailer: &dyn Mailer,
    config: &MailConfig,
    request: &SendRequest,
) -> Result<SentEmail> {
    let (to, subject, message) = match (
        required(&request.to),
        required(&request.subject),
        required(&request.message),
    ) {
        (Some(to), Some(subject), Some(message)) => (to, subject, message),
        _ => {
            return Err(VaultError::validation(
                "Missing required fields: to, subject, message",
            ))
        }
    };

    let recipients: Vec<String> = to
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if recipients.is_empty() {
        return Err(VaultError::validation("At least one recipient is required"));
    }
    if let Some(bad) = recipients.iter().find(|r| !is_valid_recipient(r)) {
        return Err(VaultError::validation(format!(
            "Invalid email address: {}",
            bad
        )));
    }

    let now = chrono::Utc::now();
    let html = render_html(
        &config.product_name,
        subject,
        message,
        &now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );

    let mut attachments = Vec::new();
    let mut attachment_info = String::new();
    if let Some(rows) = request.attach_data.as_ref().filter(|rows| !rows.is_empty()) {
        let csv = rows_to_csv(rows)?;
        attachments.push(Attachment {
            filename: format!(
                "{}_data_{}.csv",
                config.attachment_prefix,
                now.format("%Y-%m-%d")
            ),
            content_type: "text/csv".to_string(),
            content: csv.into_bytes(),
        });
        attachment_info = format!("CSV file with {} records", rows.len());
    }

    let outgoing = OutgoingEmail {
        from: config.from.clone(),
        to: recipients.clone(),
        subject: subject.to_string(),
        html,
        attachments,
    };

    let joined = recipients.join(", ");
    let sent = mailer.send(&outgoing).await;

    let (status, error) = match &sent {
        Ok(_) => (EmailStatus::Sent, String::new()),
        Err(e) => (EmailStatus::Failed, e.to_string()),
    };
    if let Err(e) = record_history(
        pool,
        &joined,
        subject,
        message,
        &attachment_info,
        status,
        &error,
    )
    .await
    {
        tracing::error!(error = %e, "failed to record email history");
    }

    match sent {
        Ok(message_id) => {
            tracing::info!(to = %joined, %message_id, "email sent");
            Ok(SentEmail {
                message_id,
                recipients,
                attachment_info,
            })
        }
        Err(e) => {
            tracing::warn!(to = %joined, error = %e, "email send failed");
            Err(e)
        }
    }
}

async fn record_history(
    pool: &SqlitePool,
    recipients: &str,
    subject: &str,
    message: &str,
    attachment_info: &str,
    status: EmailStatus,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO email_history \
         (id, recipients, subject, message, attachment_info, sent_at, status, error) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(recipients)
    .bind(subject)
    .bind(message)
    .bind(attachment_info)
    .bind(now_millis())
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent send attempts, newest first.
pub async fn email_history(pool: &SqlitePool, limit: i64) -> Result<Vec<EmailHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT id, recipients, subject, message, attachment_info, sent_at, status, error \
         FROM email_history ORDER BY sent_at DESC, rowid DESC LIMIT ?",
    )
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let status: String = row.get("status");
            EmailHistoryEntry {
                id: row.get("id"),
                to: row.get("recipients"),
                subject: row.get("subject"),
                message: row.get("message"),
                attachment_info: row.get("attachment_info"),
                sent_at: format_ts_iso(row.get("sent_at")),
                status: EmailStatus::parse(&status),
                error: row.get("error"),
            }
        })
        .collect())
}

// ============ CLI entry points ============

/// Arguments for `vault mail send`.
#[derive(Debug, Clone, Default)]
pub struct SendArgs {
    pub to: Vec<String>,
    /// Contact ids resolved to their email addresses.
    pub contact_ids: Vec<String>,
    pub subject: String,
    pub message: String,
    /// Stored rows to attach, if any.
    pub attach: Option<RecordQuery>,
}

pub async fn run_send(config: &Config, args: &SendArgs) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = send_from_cli(config, &pool, args).await;
    pool.close().await;
    let sent = result?;

    println!("sent to {}", sent.recipients.join(", "));
    println!("  message id: {}", sent.message_id);
    if !sent.attachment_info.is_empty() {
        println!("  attachment: {}", sent.attachment_info);
    }
    println!("  spool: {}", config.mail.spool_dir.display());
    Ok(())
}

async fn send_from_cli(config: &Config, pool: &SqlitePool, args: &SendArgs) -> Result<SentEmail> {
    let mut recipients = args.to.clone();
    for id in &args.contact_ids {
        let contact = get_contact(pool, id)
            .await?
            .ok_or_else(|| VaultError::not_found(format!("Contact not found: {}", id)))?;
        recipients.push(contact.email);
    }

    let attach_data = match &args.attach {
        Some(query) => {
            let store = SqliteStore::new(pool.clone());
            let rows = select_rows(&store, query).await?;
            Some(rows.into_iter().map(|r| r.data).collect())
        }
        None => None,
    };

    let request = SendRequest {
        to: Some(recipients.join(",")),
        subject: Some(args.subject.clone()),
        message: Some(args.message.clone()),
        attach_data,
    };

    let mailer = SpoolMailer::from_config(&config.mail);
    send_email(pool, &mailer, &config.mail, &request).await
}

pub async fn run_history(config: &Config, limit: i64) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let history = email_history(&pool, limit).await;
    pool.close().await;
    let history = history?;

    if history.is_empty() {
        println!("No emails sent yet.");
        return Ok(());
    }

    for entry in &history {
        println!(
            "{}  [{}]  {}  {}",
            entry.sent_at,
            entry.status.as_str(),
            entry.to,
            entry.subject
        );
        if !entry.attachment_info.is_empty() {
            println!("    attachment: {}", entry.attachment_info);
        }
        if !entry.error.is_empty() {
            println!("    error: {}", entry.error);
        }
    }
    Ok(())
}
